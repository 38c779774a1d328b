//! Fixed exam composition.
//!
//! Every test draws from the same ten subject categories in the same order.
//! The per-category targets add up to the nominal 40-question exam.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryConfig {
    pub name: &'static str,
    pub count: usize,
}

pub static CATEGORIES: &[CategoryConfig] = &[
    CategoryConfig {
        name: "traffic_rules",
        count: 8,
    },
    CategoryConfig {
        name: "first_aid",
        count: 2,
    },
    CategoryConfig {
        name: "road_signs",
        count: 8,
    },
    CategoryConfig {
        name: "vehicle_technics",
        count: 4,
    },
    CategoryConfig {
        name: "driver_ethics",
        count: 1,
    },
    CategoryConfig {
        name: "right_of_way",
        count: 3,
    },
    CategoryConfig {
        name: "parking",
        count: 2,
    },
    CategoryConfig {
        name: "speed_limits",
        count: 2,
    },
    CategoryConfig {
        name: "safe_driving",
        count: 8,
    },
    CategoryConfig {
        name: "environment",
        count: 2,
    },
];

/// Nominal exam length when every category is fully stocked.
pub fn nominal_total() -> usize {
    CATEGORIES.iter().map(|c| c.count).sum()
}

pub fn is_known_category(name: &str) -> bool {
    CATEGORIES.iter().any(|c| c.name == name)
}
