/// Fare for a booking, in whole rupiah.
pub trait PriceFunction: Send + Sync {
    fn price(&self, origin: &str, destination: &str, passengers: i32) -> i64;
}

/// Flat per-seat fare plus a surcharge for destinations off the main
/// Palembang-Indralaya corridor.
pub struct ZoneSurchargePricing {
    base_fare: i64,
    surcharges: Vec<(String, i64)>,
}

impl ZoneSurchargePricing {
    pub fn new(base_fare: i64, surcharges: Vec<(String, i64)>) -> Self {
        Self {
            base_fare,
            surcharges: surcharges
                .into_iter()
                .map(|(keyword, amount)| (keyword.to_lowercase(), amount))
                .collect(),
        }
    }
}

impl Default for ZoneSurchargePricing {
    fn default() -> Self {
        Self::new(
            25_000,
            vec![
                ("kenten".to_string(), 8_000),
                ("sako".to_string(), 8_000),
                ("plaju".to_string(), 8_000),
            ],
        )
    }
}

impl PriceFunction for ZoneSurchargePricing {
    fn price(&self, _origin: &str, destination: &str, passengers: i32) -> i64 {
        let destination = destination.to_lowercase();
        let surcharge = self
            .surcharges
            .iter()
            .find(|(keyword, _)| destination.contains(keyword.as_str()))
            .map(|(_, amount)| *amount)
            .unwrap_or(0);

        (self.base_fare + surcharge) * i64::from(passengers.max(0))
    }
}

/// `25000` -> `Rp25.000`
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    if amount < 0 {
        format!("-Rp{grouped}")
    } else {
        format!("Rp{grouped}")
    }
}
