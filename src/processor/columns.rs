//! Canonical column names and the fallbacks used to resolve business roles.

pub const TRANSACTION_ID: &str = "transaction_id";
pub const SYNTHETIC_KEY: &str = "transaction_sk";

pub const DATE_CANDIDATES: &[&str] = &["transaction_date", "date"];
pub const TIME_COLUMN: &str = "transaction_time";
pub const QUANTITY_CANDIDATES: &[&str] = &["transaction_qty", "quantity", "qty"];
pub const UNIT_PRICE: &str = "unit_price";
pub const AMOUNT_CANDIDATES: &[&str] = &["total_bill", "sales_amount", "total_amount"];

/// Category column consulted by the exclusion filter.
pub const CATEGORY_COLUMN: &str = "product_category";
/// Encoding priority.
pub const ENCODE_CANDIDATES: &[&str] = &["product_category", "product_type", "store_location"];
/// Source text for the category mapper, in order of preference.
pub const MAPPER_SOURCE_CANDIDATES: &[&str] = &["product_type", "product_detail"];

/// Preferred outlier targets, in order.
pub const OUTLIER_PREFERENCE: &[&str] = &[
    "unit_price",
    "transaction_qty",
    "total_bill",
    "sales_amount",
    "total_amount",
];

/// Hashed into a synthetic key, in this order, when present.
pub const SYNTHETIC_KEY_CANDIDATES: &[&str] = &[
    "transaction_date",
    "transaction_time",
    "store_location",
    "product_id",
    "product_type",
    "product_category",
];

pub const TREND_DATE: &str = "trend_date";
pub const TREND_DATE_CANDIDATES: &[&str] = &["date", "unnamed:_0", "unnamed:0"];
pub const PARTIAL_FLAGS: &[&str] = &["ispartial", "is_partial"];

pub const SALE_DATE: &str = "sale_date";
pub const YEAR: &str = "year";
pub const MONTH: &str = "month";
pub const DAY_OF_WEEK: &str = "day_of_week";
pub const IS_WEEKEND: &str = "is_weekend";
pub const DATE_KEY: &str = "date_key";
pub const GROSS_REVENUE: &str = "gross_revenue";
pub const REV_PER_UNIT: &str = "rev_per_unit";
pub const TREND_AVG: &str = "trend_avg";
pub const TREND_MAX: &str = "trend_max";
pub const CATEGORY_MAPPED: &str = "product_category_mapped";
pub const TREND_FOR_PRODUCT: &str = "trend_for_product";

/// Columns that always hold numbers even if CSV inference typed them as text.
pub fn is_business_numeric(name: &str) -> bool {
    name == UNIT_PRICE || QUANTITY_CANDIDATES.contains(&name) || AMOUNT_CANDIDATES.contains(&name)
}
