use serde::{Deserialize, Serialize};

/// One entry of a bounding-box result page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSummary {
    pub uuid: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageMeta {
    pub total: u64,
    pub last_page: u32,
    pub current_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchEnvelope {
    pub data: Vec<LocationSummary>,
    pub meta: PageMeta,
}

/// One response to a bounding-box query.
#[derive(Debug, Clone)]
pub struct SearchResultPage {
    pub entities: Vec<LocationSummary>,
    /// Matches across the whole cell, not just this page.
    pub total_matches: u64,
    pub current_page: u32,
    pub last_page: u32,
}

impl From<SearchEnvelope> for SearchResultPage {
    fn from(envelope: SearchEnvelope) -> Self {
        Self {
            entities: envelope.data,
            total_matches: envelope.meta.total,
            current_page: envelope.meta.current_page,
            last_page: envelope.meta.last_page,
        }
    }
}

/// Body of the location detail endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailEnvelope {
    pub data: LocationDetail,
}

/// Fields of a location we shape into an output record. `Option` fields are
/// nullable upstream; the rest must be present. Only the first device's
/// payment details are read, so later devices may omit them.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationDetail {
    pub uuid: String,
    pub name: Option<String>,
    pub country: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub parking: Parking,
    pub devices: Vec<Device>,
    pub operator: Operator,
    pub owner: Owner,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parking {
    pub fee: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub payment_details: Option<PaymentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetails {
    pub pricing: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Operator {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub telephone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GuestToken {
    pub access_token: String,
}
