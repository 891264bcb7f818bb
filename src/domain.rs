use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// one chemical element reading
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementResult {
    pub element: String,
    pub value: f64,
}

/// a tested sample as stored and served by the read api
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SampleResult {
    pub sample_name: String,
    pub furnace: String,
    pub time_stamp: DateTime<Utc>,
    /// spectro machine the sample was tested on
    #[serde(rename = "Spectro")]
    pub source_machine: i64,
    #[serde(rename = "results", skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<ElementResult>,
}

impl SampleResult {
    /// identity used for dedup: same instant on the same machine is the same test
    pub fn event_key(&self) -> (DateTime<Utc>, i64) {
        (self.time_stamp, self.source_machine)
    }
}

/// a record as a result source sends it
///
/// `results` is either a list of `{element, value}` or an object of
/// element -> value. The machine number is optional and filled in by the
/// poller from the source it came from.
#[derive(Clone, Debug, Deserialize)]
pub struct ResultDocument {
    pub sample_name: String,
    pub furnace: String,
    pub time_stamp: DateTime<Utc>,
    #[serde(rename = "results", default, deserialize_with = "deserialize_elements")]
    pub elements: Vec<ElementResult>,
    #[serde(rename = "Spectro", default)]
    pub source_machine: Option<i64>,
}

impl ResultDocument {
    pub fn into_result(self, default_machine: i64) -> SampleResult {
        SampleResult {
            sample_name: self.sample_name,
            furnace: self.furnace,
            time_stamp: self.time_stamp,
            source_machine: self.source_machine.unwrap_or(default_machine),
            elements: self.elements,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ElementsDocument {
    List(Vec<ElementResult>),
    Map(BTreeMap<String, f64>),
}

fn deserialize_elements<'de, D>(deserializer: D) -> Result<Vec<ElementResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let doc = Option::<ElementsDocument>::deserialize(deserializer)?;
    Ok(match doc {
        None => Vec::new(),
        Some(ElementsDocument::List(list)) => list,
        Some(ElementsDocument::Map(map)) => map
            .into_iter()
            .map(|(element, value)| ElementResult { element, value })
            .collect(),
    })
}

/// time-sync source response
#[derive(Clone, Debug, Deserialize)]
pub struct TimeDocument {
    pub t: DateTime<chrono::FixedOffset>,
}
