use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Resultados exitosos agrupados por URL.
///
/// Dentro de cada URL el orden es el de finalización, no el de emisión.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultStore {
    entries: BTreeMap<String, Vec<Job>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, url: impl Into<String>, job: Job) {
        self.entries.entry(url.into()).or_default().push(job);
    }

    pub fn get(&self, url: &str) -> Option<&[Job]> {
        self.entries.get(url).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Job])> {
        self.entries
            .iter()
            .map(|(url, jobs)| (url.as_str(), jobs.as_slice()))
    }

    /// Cantidad de URLs distintas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total de muestras guardadas, sumando todas las URLs.
    pub fn samples(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
