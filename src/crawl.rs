use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::api::types::SearchResultPage;
use crate::api::{ApiError, DirectoryClient};
use crate::collector::{Collector, Offer, PendingDetail};
use crate::grid::{GeoCell, Refinement, PAGE_CAPACITY};
use crate::record::{shape_record, NormalizedRecord};
use crate::sink::RecordSink;

/// Counters for one crawl, logged when it finishes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub cells_queried: usize,
    pub cells_subdivided: usize,
    /// Fine cells over the page capacity; matches beyond it are unreachable.
    pub cells_truncated: usize,
    pub pages_fetched: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub emitted: usize,
    pub out_of_region: usize,
    pub malformed: usize,
    pub failed_units: usize,
}

enum Job {
    Search(GeoCell),
    Detail(PendingDetail),
}

enum Completed {
    Search(GeoCell, Result<SearchResultPage, ApiError>),
    Detail(PendingDetail, Result<serde_json::Value, ApiError>),
}

async fn run_job(client: &DirectoryClient, job: Job) -> Completed {
    match job {
        Job::Search(cell) => {
            let result = client.search(&cell).await;
            Completed::Search(cell, result)
        }
        Job::Detail(pending) => {
            let result = client.location(&pending.uuid).await;
            Completed::Detail(pending, result)
        }
    }
}

/// Drives the tiled search over a set of seed cells.
pub struct Crawler<'a> {
    client: &'a DirectoryClient,
    target_country: &'a str,
    max_in_flight: usize,
}

impl<'a> Crawler<'a> {
    pub fn new(client: &'a DirectoryClient, target_country: &'a str, max_in_flight: usize) -> Self {
        Self {
            client,
            target_country,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Crawl until every seed cell, its pages and its sub-cells are exhausted.
    ///
    /// Requests run concurrently but every page and detail is handled here,
    /// one at a time, so the collector and sink see a single writer.
    pub async fn run<S>(
        &self,
        seeds: Vec<GeoCell>,
        collector: &mut Collector,
        sink: &mut S,
    ) -> Result<CrawlReport>
    where
        S: RecordSink<NormalizedRecord>,
    {
        info!(
            seeds = seeds.len(),
            known = collector.known().len(),
            "Starting tiled crawl"
        );
        let mut coordinator = Coordinator {
            collector,
            sink,
            target_country: self.target_country,
            searches: seeds.into_iter().collect(),
            details: VecDeque::new(),
            report: CrawlReport::default(),
        };
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.max_in_flight {
                let Some(job) = coordinator.next_job() else {
                    break;
                };
                in_flight.push(run_job(self.client, job));
            }

            let Some(completed) = in_flight.next().await else {
                break;
            };
            match completed {
                Completed::Search(cell, Ok(page)) => coordinator.on_page(cell, page),
                Completed::Search(cell, Err(e)) => coordinator.on_failure(&cell.to_string(), e)?,
                Completed::Detail(pending, Ok(detail)) => coordinator.on_detail(pending, detail)?,
                Completed::Detail(pending, Err(e)) => coordinator.on_failure(&pending.uuid, e)?,
            }
        }

        let report = coordinator.report;
        info!(
            cells = report.cells_queried,
            subdivided = report.cells_subdivided,
            truncated = report.cells_truncated,
            pages = report.pages_fetched,
            accepted = report.accepted,
            duplicates = report.duplicates,
            emitted = report.emitted,
            out_of_region = report.out_of_region,
            malformed = report.malformed,
            failed = report.failed_units,
            "Crawl complete"
        );
        Ok(report)
    }
}

/// Work queues and the state only the coordinating loop may touch.
struct Coordinator<'c, 's, S> {
    collector: &'c mut Collector,
    sink: &'s mut S,
    target_country: &'c str,
    searches: VecDeque<GeoCell>,
    details: VecDeque<PendingDetail>,
    report: CrawlReport,
}

impl<S: RecordSink<NormalizedRecord>> Coordinator<'_, '_, S> {
    /// Details first, so accepted ids do not pile up behind new pages.
    fn next_job(&mut self) -> Option<Job> {
        if let Some(pending) = self.details.pop_front() {
            return Some(Job::Detail(pending));
        }
        self.searches.pop_front().map(Job::Search)
    }

    fn on_page(&mut self, cell: GeoCell, page: SearchResultPage) {
        self.report.pages_fetched += 1;
        let first_page = cell.page == 1;
        if first_page {
            self.report.cells_queried += 1;
        }

        if first_page && page.total_matches > PAGE_CAPACITY {
            match cell.refinement {
                Refinement::Coarse => {
                    info!(cell = %cell, total = page.total_matches, "Subdividing cell");
                    self.report.cells_subdivided += 1;
                    self.searches.extend(cell.subdivide());
                    return;
                }
                Refinement::Fine => {
                    warn!(
                        cell = %cell,
                        total = page.total_matches,
                        "Fine cell exceeds page capacity, results beyond it are unreachable"
                    );
                    self.report.cells_truncated += 1;
                }
            }
        }

        debug!(
            cell = %cell,
            page = page.current_page,
            last_page = page.last_page,
            entities = page.entities.len(),
            "page fetched"
        );
        for entity in &page.entities {
            match self.collector.offer(&entity.uuid, &entity.created_at) {
                Offer::Accepted(pending) => {
                    self.report.accepted += 1;
                    self.details.push_back(pending);
                }
                Offer::Duplicate => self.report.duplicates += 1,
            }
        }

        if page.entities.is_empty() {
            return;
        }
        // Never trust the echoed page to move backwards.
        let cursor = GeoCell {
            page: page.current_page.max(cell.page),
            ..cell
        };
        if cursor.page < page.last_page {
            self.searches.push_back(cursor.next_page());
        }
    }

    fn on_detail(&mut self, pending: PendingDetail, detail: serde_json::Value) -> Result<()> {
        match shape_record(detail, &pending.created_at, self.target_country) {
            Ok(Some(record)) => {
                self.sink.emit(&record)?;
                self.report.emitted += 1;
            }
            Ok(None) => {
                debug!(uuid = %pending.uuid, "location outside target country, dropped");
                self.report.out_of_region += 1;
            }
            Err(e) => {
                warn!(uuid = %pending.uuid, error = %e, "Malformed location detail, skipped");
                self.report.malformed += 1;
            }
        }
        Ok(())
    }

    /// Abandon one unit of work, or stop everything when credentials are gone.
    fn on_failure(&mut self, unit: &str, error: ApiError) -> Result<()> {
        if error.is_fatal() {
            return Err(anyhow!(error).context(format!("aborting crawl at {}", unit)));
        }
        warn!(unit, error = %error, "Work unit abandoned");
        self.report.failed_units += 1;
        Ok(())
    }
}
