/// Stage names used by the coordinator, CLI selection and log output.
/// The order of `STAGE_ORDER` is the order the coordinator runs them in.
pub const SCRAPE_STAGE: &str = "scrape";
pub const LOAD_RAW_STAGE: &str = "load_raw";
pub const TRANSFORM_STAGE: &str = "transform";
pub const ENRICH_STAGE: &str = "enrich";
pub const LOAD_ENRICHMENT_STAGE: &str = "load_enrichment";

pub const STAGE_ORDER: [&str; 5] = [
    SCRAPE_STAGE,
    LOAD_RAW_STAGE,
    TRANSFORM_STAGE,
    ENRICH_STAGE,
    LOAD_ENRICHMENT_STAGE,
];

// Source-imposed ceiling on history page size
pub const MAX_PAGE_SIZE: usize = 100;

// Landing and attachment file extensions
pub const LANDING_EXT: &str = "jsonl";
pub const IMAGE_EXT: &str = "jpg";

// Warehouse tables
pub const RAW_MESSAGES_TABLE: &str = "raw_telegram_messages";
pub const RAW_DETECTIONS_TABLE: &str = "raw_image_detections";

/// Labels the detector emits for people
pub const PERSON_LABEL: &str = "person";

/// Detector labels treated as product-like containers (pills, creams, bottles)
pub const PRODUCT_LIKE_LABELS: [&str; 6] = ["bottle", "cup", "vase", "bowl", "cell phone", "book"];

/// Check whether a stage name is one the coordinator knows about
pub fn is_known_stage(name: &str) -> bool {
    STAGE_ORDER.contains(&name)
}
