use std::fmt;

use crate::state::Region;

/// Most matches a single bounding-box query can page through.
pub const PAGE_CAPACITY: u64 = 250;

/// Fine steps per axis inside one coarse cell.
pub const SUBDIVISIONS: usize = 10;

/// Hundredths of a degree between neighbouring fine cells.
const FINE_STEP: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Refinement {
    /// 1-degree tile.
    Coarse,
    /// 0.1-degree tile inside a coarse one.
    Fine,
}

/// A tile of the search space plus its pagination cursor.
///
/// Coordinates are signed hundredths of a degree so that fine tiling is exact
/// and `-0.10` stays distinguishable from `0.10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeoCell {
    pub latitude: i32,
    pub longitude: i32,
    pub refinement: Refinement,
    pub page: u32,
}

impl GeoCell {
    pub fn coarse(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude: latitude * 100,
            longitude: longitude * 100,
            refinement: Refinement::Coarse,
            page: 1,
        }
    }

    pub fn fine(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude,
            longitude,
            refinement: Refinement::Fine,
            page: 1,
        }
    }

    /// Same tile, one page further on.
    pub fn next_page(self) -> Self {
        Self {
            page: self.page + 1,
            ..self
        }
    }

    pub fn latitude_param(&self) -> String {
        format_degrees(self.latitude, self.refinement)
    }

    pub fn longitude_param(&self) -> String {
        format_degrees(self.longitude, self.refinement)
    }

    /// Split a coarse cell into its 10x10 fine cells, each at page 1.
    /// Fine cells are never split further.
    pub fn subdivide(&self) -> Vec<GeoCell> {
        if self.refinement == Refinement::Fine {
            return Vec::new();
        }
        let lat_steps = fine_steps(self.latitude / 100);
        let lon_steps = fine_steps(self.longitude / 100);

        let mut cells = Vec::with_capacity(SUBDIVISIONS * SUBDIVISIONS);
        for &lat in &lat_steps {
            for &lon in &lon_steps {
                cells.push(GeoCell::fine(lat, lon));
            }
        }
        cells
    }
}

impl fmt::Display for GeoCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {})",
            self.latitude_param(),
            self.longitude_param()
        )
    }
}

/// Every coarse cell of the region, south to north, west to east.
pub fn coarse_cells(region: &Region) -> Vec<GeoCell> {
    let mut cells = Vec::with_capacity(region.cell_count());
    for latitude in region.south..=region.north {
        for longitude in region.west..=region.east {
            cells.push(GeoCell::coarse(latitude, longitude));
        }
    }
    cells
}

/// Fine axis values (hundredths) covering the coarse value `degree`.
///
/// Non-negative: `d.00, d.10 .. d.90`. Negative: `d.00` then the ten-cent
/// steps of the next degree toward zero, so `-1` gives `-1.00, -0.10 .. -0.90`.
/// The zero degree is never emitted with a negative sign.
pub fn fine_steps(degree: i32) -> [i32; SUBDIVISIONS] {
    let mut steps = [0i32; SUBDIVISIONS];
    if degree >= 0 {
        for (k, step) in steps.iter_mut().enumerate() {
            *step = degree * 100 + k as i32 * FINE_STEP;
        }
    } else {
        steps[0] = degree * 100;
        let toward_zero = (degree + 1) * 100;
        for (k, step) in steps.iter_mut().enumerate().skip(1) {
            *step = toward_zero - k as i32 * FINE_STEP;
        }
    }
    steps
}

fn format_degrees(hundredths: i32, refinement: Refinement) -> String {
    let sign = if hundredths < 0 { "-" } else { "" };
    let abs = hundredths.unsigned_abs();
    match refinement {
        Refinement::Coarse => format!("{}{}.{}", sign, abs / 100, (abs % 100) / 10),
        Refinement::Fine => format!("{}{}.{:02}", sign, abs / 100, abs % 100),
    }
}
