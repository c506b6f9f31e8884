/// Buckets free-text destinations into a small set of named zones.
///
/// Two bookings pool or group together only when their destinations land in
/// the same zone.
pub trait ZoneClassifier: Send + Sync {
    fn classify(&self, destination: &str) -> String;
}

/// First matching keyword wins; anything unmatched falls into `fallback`.
pub struct KeywordZones {
    rules: Vec<(String, String)>,
    fallback: String,
}

impl KeywordZones {
    pub fn new<I, K, Z>(rules: I, fallback: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, Z)>,
        K: Into<String>,
        Z: Into<String>,
    {
        Self {
            rules: rules
                .into_iter()
                .map(|(keyword, zone)| (keyword.into().to_lowercase(), zone.into()))
                .collect(),
            fallback: fallback.into(),
        }
    }

    /// Indralaya campus versus everything in Palembang city.
    pub fn campus() -> Self {
        Self::new([("indralaya", "Indralaya")], "Palembang")
    }
}

impl ZoneClassifier for KeywordZones {
    fn classify(&self, destination: &str) -> String {
        let needle = destination.to_lowercase();
        self.rules
            .iter()
            .find(|(keyword, _)| needle.contains(keyword.as_str()))
            .map(|(_, zone)| zone.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}
