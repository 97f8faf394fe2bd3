use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub weight_g: Option<f64>,
    pub depth_cm: Option<f64>,
    pub width_cm: Option<f64>,
    pub height_cm: Option<f64>,
    pub quantity: u32,
    pub mention_warning: Option<String>,
}

impl Package {
    pub fn volume_cubic_meters(&self) -> f64 {
        match (self.depth_cm, self.width_cm, self.height_cm) {
            (Some(d), Some(w), Some(h)) => (d * w * h / 1_000_000.0) * self.quantity as f64,
            _ => 0.0,
        }
    }

    pub fn total_weight_g(&self) -> f64 {
        self.weight_g.unwrap_or(0.0) * self.quantity as f64
    }

    pub fn is_fragile(&self) -> bool {
        self.mention_warning.as_deref() == Some("fragile")
    }
}
