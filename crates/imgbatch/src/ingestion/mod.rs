//! Upload ingestion: turns a CSV upload into product rows

mod csv_upload;

pub use csv_upload::{parse_upload, split_url_list};
