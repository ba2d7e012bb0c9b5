//! Built-in factor tables
//!
//! Values mirror the published defaults the tool has shipped with since the
//! first release. Bump [`DEFAULT_FACTORS_VERSION`] whenever a value changes.

pub const DEFAULT_FACTORS_VERSION: &str = "2024.1";

/// Global average grid intensity, kg CO2 per kWh
pub const GLOBAL_CARBON_INTENSITY: f64 = 0.000475;

/// Power assumed for instance types with no family match, watts
pub const DEFAULT_INSTANCE_POWER_WATTS: f64 = 50.0;

/// Hourly price assumed for instance types with no family match, USD
pub const DEFAULT_INSTANCE_COST_PER_HOUR: f64 = 0.1;

/// Unit price assumed for consumption categories without a price entry
pub const DEFAULT_ITEM_UNIT_PRICE: f64 = 10.0;

/// kg CO2 per kWh by cloud region
pub const REGION_CARBON_INTENSITY: &[(&str, f64)] = &[
    ("us-east-1", 0.000415),
    ("us-east-2", 0.000523),
    ("us-west-1", 0.000351),
    ("us-west-2", 0.000351),
    ("eu-west-1", 0.000316),
    ("eu-central-1", 0.000338),
    ("ap-southeast-1", 0.000493),
    ("ap-northeast-1", 0.000506),
];

/// Rated draw in watts by instance type
pub const INSTANCE_POWER_WATTS: &[(&str, f64)] = &[
    ("t2.nano", 5.0),
    ("t2.micro", 10.0),
    ("t2.small", 20.0),
    ("t2.medium", 40.0),
    ("t3.nano", 5.0),
    ("t3.micro", 10.0),
    ("t3.small", 20.0),
    ("t3.medium", 40.0),
    ("m5.large", 80.0),
    ("m5.xlarge", 160.0),
    ("m5.2xlarge", 320.0),
    ("c5.large", 70.0),
    ("c5.xlarge", 140.0),
    ("c5.2xlarge", 280.0),
    ("r5.large", 200.0),
    ("r5.xlarge", 180.0),
    ("r5.2xlarge", 360.0),
];

/// On-demand USD per hour by instance type
pub const INSTANCE_COST_PER_HOUR: &[(&str, f64)] = &[
    ("t2.nano", 0.0058),
    ("t2.micro", 0.0116),
    ("t2.small", 0.023),
    ("t2.medium", 0.046),
    ("t3.nano", 0.0052),
    ("t3.micro", 0.0104),
    ("t3.small", 0.0208),
    ("t3.medium", 0.0416),
    ("m5.large", 0.096),
    ("m5.xlarge", 0.192),
    ("m5.2xlarge", 0.384),
    ("c5.large", 0.085),
    ("c5.xlarge", 0.17),
    ("c5.2xlarge", 0.34),
    ("r5.large", 0.126),
    ("r5.xlarge", 0.252),
    ("r5.2xlarge", 0.504),
];

/// kg CO2 per unit (kg, litre, kWh or item) by consumption category
pub const CONSUMPTION_EMISSION_FACTORS: &[(&str, f64)] = &[
    ("meat_beef", 27.0),
    ("meat_pork", 12.1),
    ("meat_chicken", 6.9),
    ("meat_fish", 6.1),
    ("dairy_milk", 3.2),
    ("dairy_cheese", 13.5),
    ("dairy_yogurt", 2.2),
    ("vegetables", 2.0),
    ("fruits", 1.1),
    ("grains", 2.7),
    ("bread", 0.9),
    ("eggs", 4.2),
    ("fuel_gasoline", 2.31),
    ("fuel_diesel", 2.68),
    ("public_transport", 0.089),
    ("taxi_ride", 0.21),
    ("electricity", 0.475),
    ("natural_gas", 0.202),
    ("clothing", 33.4),
    ("electronics", 300.0),
    ("books", 1.8),
    ("household_items", 5.0),
    ("cosmetics", 3.0),
    ("cleaning_products", 2.5),
];

/// Typical retail price per unit, used to turn a receipt price into an amount
pub const ITEM_UNIT_PRICES: &[(&str, f64)] = &[
    ("meat_beef", 15.0),
    ("meat_pork", 10.0),
    ("meat_chicken", 8.0),
    ("meat_fish", 20.0),
    ("dairy_milk", 1.5),
    ("dairy_cheese", 12.0),
    ("dairy_yogurt", 4.0),
    ("vegetables", 3.0),
    ("fruits", 4.0),
    ("grains", 2.0),
    ("bread", 3.0),
    ("eggs", 3.0),
    ("fuel_gasoline", 1.5),
    ("fuel_diesel", 1.6),
    ("clothing", 50.0),
    ("electronics", 500.0),
];

/// kg CO2 per activity unit, keyed `<activity>_<unit>`
pub const ACTIVITY_EQUIVALENTS: &[(&str, f64)] = &[
    ("electricity_kwh", 0.475),
    ("gasoline_liter", 2.31),
    ("natural_gas_m3", 2.0),
    ("beef_kg", 27.0),
    ("chicken_kg", 6.9),
    ("milk_liter", 3.2),
    ("cheese_kg", 13.5),
    ("flight_km", 0.255),
    ("car_km", 0.21),
    ("train_km", 0.041),
    ("bus_km", 0.089),
];

/// Instance size ladder used for nearest-tier fallback
pub const INSTANCE_SIZE_TIERS: &[&str] = &[
    "nano", "micro", "small", "medium", "large", "xlarge", "2xlarge", "4xlarge", "8xlarge",
    "12xlarge", "16xlarge", "24xlarge", "32xlarge", "48xlarge",
];
