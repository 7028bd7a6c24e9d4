pub mod listing;
pub mod performer_name;
pub mod product_id;
