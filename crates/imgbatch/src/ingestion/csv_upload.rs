//! CSV upload parsing
//!
//! Expected layout is a header row followed by `index, product_name, input_urls`
//! rows. `input_urls` is a comma-joined list; it may be a single quoted field
//! or spill over into the trailing unquoted columns.

use crate::error::{Error, Result};
use crate::imaging::normalize_url;
use crate::types::NewProduct;

/// Column holding the product name
const NAME_COLUMN: usize = 1;
/// First column holding image URLs
const URLS_COLUMN: usize = 2;

/// Parse an uploaded CSV body into product rows.
///
/// Any malformed row rejects the whole upload so no partial batch is created.
pub fn parse_upload(data: &[u8]) -> Result<Vec<NewProduct>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    reader
        .headers()
        .map_err(|e| Error::validation(format!("Unreadable header row: {}", e)))?;

    let mut products = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| Error::validation(format!("Malformed CSV: {}", e)))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let product_name = record.get(NAME_COLUMN).unwrap_or("").to_string();
        if product_name.is_empty() {
            return Err(Error::validation(format!("Line {}: missing product name", line)));
        }

        let input_urls: Vec<String> = record
            .iter()
            .skip(URLS_COLUMN)
            .flat_map(split_url_list)
            .collect();
        if input_urls.is_empty() {
            return Err(Error::validation(format!(
                "Line {}: product '{}' has no input image URLs",
                line, product_name
            )));
        }

        products.push(NewProduct {
            product_name,
            input_urls,
        });
    }

    if products.is_empty() {
        return Err(Error::validation("Upload contains no product rows"));
    }

    Ok(products)
}

/// Split a comma-joined URL list, normalizing each entry and dropping blanks
pub fn split_url_list(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(normalize_url)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_url_list() {
        let csv = "S. No.,Product Name,Input Image Urls\n\
                   1,SKU1,\"https://a.example/1.jpg, https://a.example/2.jpg\"\n\
                   2,SKU2,https://a.example/3.png\n";
        let products = parse_upload(csv.as_bytes()).unwrap();

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].product_name, "SKU1");
        assert_eq!(
            products[0].input_urls,
            vec!["https://a.example/1.jpg", "https://a.example/2.jpg"]
        );
        assert_eq!(products[1].input_urls, vec!["https://a.example/3.png"]);
    }

    #[test]
    fn test_unquoted_urls_spill_into_trailing_columns() {
        let csv = "index,name,urls\n1,SKU1,https://a.example/1.jpg,https://a.example/2.jpg\n";
        let products = parse_upload(csv.as_bytes()).unwrap();
        assert_eq!(products[0].input_urls.len(), 2);
    }

    #[test]
    fn test_empty_url_list_rejects_upload() {
        let csv = "index,name,urls\n1,SKU1,https://a.example/1.jpg\n2,SKU2,\n";
        let err = parse_upload(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("SKU2"));
    }

    #[test]
    fn test_missing_product_name_rejects_upload() {
        let csv = "index,name,urls\n1,,https://a.example/1.jpg\n";
        assert!(matches!(
            parse_upload(csv.as_bytes()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_header_only_is_rejected() {
        let csv = "index,name,urls\n";
        assert!(matches!(
            parse_upload(csv.as_bytes()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let csv = "index,name,urls\n\n1,SKU1,https://a.example/1.jpg\n,,\n";
        let products = parse_upload(csv.as_bytes()).unwrap();
        assert_eq!(products.len(), 1);
    }

    #[test]
    fn test_split_url_list_strips_quotes_and_blanks() {
        let urls = split_url_list(" \"https://a.example/1.jpg\" ,, 'https://a.example/2.jpg'");
        assert_eq!(urls, vec!["https://a.example/1.jpg", "https://a.example/2.jpg"]);
    }
}
