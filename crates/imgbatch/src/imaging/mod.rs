//! Image fetching and recompression

mod fetcher;
mod transformer;

pub use fetcher::{decode_image, normalize_url, FetchError, FetchedImage, ImageFetcher};
pub use transformer::{EncodedImage, ImageTransformer, TransformError, OUTPUT_EXTENSION};
