//! Google Sheets (REST v4) table store.
//!
//! The first row of the worksheet holds headers; data row `i` lives at
//! sheet row `i + 2`. Authentication is a pre-issued OAuth bearer token.

use super::{Row, RowUpdate, TableStore};
use crate::config::{ColumnConfig, TableConfig};
use crate::io::ApiError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

const SERVICE: &str = "Sheets API";

/// Convert a 0-based column position into A1 letters (0 → A, 26 → AA).
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Quote a sheet name for use in an A1 range when it needs it.
fn a1_sheet_name(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// Positions of the configured headers within the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnLayout {
    street: usize,
    city: usize,
    state: usize,
    postal_code: usize,
    output: usize,
    status: usize,
}

impl ColumnLayout {
    fn from_headers(headers: &[String], columns: &ColumnConfig) -> Result<Self> {
        let find = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
                .with_context(|| format!("Header '{}' not found in sheet (have: {:?})", name, headers))
        };

        Ok(Self {
            street: find(&columns.street)?,
            city: find(&columns.city)?,
            state: find(&columns.state)?,
            postal_code: find(&columns.postal_code)?,
            output: find(&columns.output)?,
            status: find(&columns.status)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Split a worksheet into its header row and unprocessed data rows.
fn parse_rows(values: &[Vec<Value>], columns: &ColumnConfig) -> Result<(ColumnLayout, Vec<Row>)> {
    let headers: Vec<String> = values
        .first()
        .map(|row| row.iter().map(cell_text).collect())
        .unwrap_or_default();
    let layout = ColumnLayout::from_headers(&headers, columns)?;

    let cell = |row: &[Value], idx: usize| row.get(idx).map(cell_text).unwrap_or_default();

    let rows = values
        .iter()
        .skip(1)
        .enumerate()
        .filter(|(_, row)| cell(row, layout.output).trim().is_empty())
        .filter(|(_, row)| row.iter().any(|v| !cell_text(v).trim().is_empty()))
        .map(|(row_index, row)| Row {
            row_index,
            street: cell(row, layout.street),
            city: cell(row, layout.city),
            state: cell(row, layout.state),
            postal_code: cell(row, layout.postal_code),
        })
        .collect();

    Ok((layout, rows))
}

/// Table store backed by a Google Sheets worksheet.
pub struct SheetsTable {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    sheet_name: String,
    access_token: String,
    columns: ColumnConfig,
    layout: OnceCell<ColumnLayout>,
}

impl SheetsTable {
    pub fn new(client: reqwest::Client, config: &TableConfig) -> Result<Self> {
        let spreadsheet_id = config
            .spreadsheet_id
            .clone()
            .context("Missing spreadsheet id")?;
        let access_token = config
            .access_token
            .clone()
            .context("Missing Sheets access token")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            spreadsheet_id,
            sheet_name: config.sheet_name.clone(),
            access_token,
            columns: config.columns.clone(),
            layout: OnceCell::new(),
        })
    }

    fn values_url(&self, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid Sheets base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Sheets base URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<Value>>> {
        let url = self.values_url(&["values", range])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await
            .map_err(|e| ApiError::http(SERVICE, e))?;

        let response = ApiError::check_status(SERVICE, response).await?;
        let body: ValueRange = response.json().await.map_err(|e| ApiError::http(SERVICE, e))?;
        Ok(body.values)
    }

    async fn layout(&self) -> Result<&ColumnLayout> {
        self.layout
            .get_or_try_init(|| async {
                let range = format!("{}!1:1", a1_sheet_name(&self.sheet_name));
                let values = self.get_values(&range).await?;
                let (layout, _) = parse_rows(&values, &self.columns)?;
                Ok::<_, anyhow::Error>(layout)
            })
            .await
    }

    fn update_body(&self, layout: &ColumnLayout, updates: &[RowUpdate]) -> Value {
        let sheet = a1_sheet_name(&self.sheet_name);
        let output_col = column_letter(layout.output);
        let status_col = column_letter(layout.status);

        let data: Vec<Value> = updates
            .iter()
            .flat_map(|u| {
                let sheet_row = u.row_index + 2;
                [
                    json!({
                        "range": format!("{}!{}{}", sheet, output_col, sheet_row),
                        "values": [[u.value]],
                    }),
                    json!({
                        "range": format!("{}!{}{}", sheet, status_col, sheet_row),
                        "values": [[u.status]],
                    }),
                ]
            })
            .collect();

        json!({ "valueInputOption": "RAW", "data": data })
    }
}

#[async_trait]
impl TableStore for SheetsTable {
    async fn fetch_unprocessed(&self) -> Result<Vec<Row>> {
        let values = self.get_values(&a1_sheet_name(&self.sheet_name)).await?;
        let (layout, rows) = parse_rows(&values, &self.columns)?;
        let _ = self.layout.set(layout);

        tracing::info!(
            "Read {} data rows from sheet '{}', {} unprocessed",
            values.len().saturating_sub(1),
            self.sheet_name,
            rows.len()
        );
        Ok(rows)
    }

    async fn batch_write(&self, updates: &[RowUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let layout = self.layout().await?;
        let body = self.update_body(layout, updates);
        let url = self.values_url(&["values:batchUpdate"])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::http(SERVICE, e))?;
        ApiError::check_status(SERVICE, response).await?;

        tracing::debug!("Wrote {} rows to sheet '{}'", updates.len(), self.sheet_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sheet_values() -> Value {
        json!({
            "range": "Sheet1!A1:F5",
            "majorDimension": "ROWS",
            "values": [
                ["address", "city", "state", "zip_code", "image_URL", "Processing Status"],
                ["1 Main St", "Springfield", "IL", "62701", "https://img/1", "Success"],
                ["2 Oak Ave", "Springfield", "IL", 62702],
                [],
                ["4 Elm Rd", "Springfield", "IL", "62704", "", "Error: Geocoding failed"]
            ]
        })
    }

    fn config(base_url: &str) -> TableConfig {
        TableConfig {
            spreadsheet_id: Some("sheet-id".to_string()),
            access_token: Some("token".to_string()),
            base_url: base_url.to_string(),
            ..TableConfig::default()
        }
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(4), "E");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_a1_sheet_name_quoting() {
        assert_eq!(a1_sheet_name("Sheet1"), "Sheet1");
        assert_eq!(a1_sheet_name("My Sheet"), "'My Sheet'");
        assert_eq!(a1_sheet_name("Bob's"), "'Bob''s'");
    }

    #[test]
    fn test_parse_rows_filters_processed_and_blank() {
        let values: ValueRange = serde_json::from_value(sheet_values()).unwrap();
        let (layout, rows) = parse_rows(&values.values, &ColumnConfig::default()).unwrap();

        assert_eq!(layout.output, 4);
        assert_eq!(layout.status, 5);

        let indices: Vec<_> = rows.iter().map(|r| r.row_index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(rows[0].postal_code, "62702");
        assert_eq!(rows[1].street, "4 Elm Rd");
    }

    #[test]
    fn test_parse_rows_missing_header() {
        let values = vec![vec![json!("address"), json!("city")]];
        let err = parse_rows(&values, &ColumnConfig::default()).unwrap_err();
        assert!(err.to_string().contains("state"));
    }

    #[tokio::test]
    async fn test_fetch_and_batch_write() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-id/values/Sheet1"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sheet_values()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-id/values:batchUpdate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let table = SheetsTable::new(reqwest::Client::new(), &config(&server.uri())).unwrap();
        let rows = table.fetch_unprocessed().await.unwrap();
        assert_eq!(rows.len(), 2);

        table
            .batch_write(&[RowUpdate {
                row_index: 1,
                value: "https://img/2".to_string(),
                status: "Success".to_string(),
            }])
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(body["valueInputOption"], "RAW");
        assert_eq!(body["data"][0]["range"], "Sheet1!E3");
        assert_eq!(body["data"][0]["values"][0][0], "https://img/2");
        assert_eq!(body["data"][1]["range"], "Sheet1!F3");
    }

    #[tokio::test]
    async fn test_http_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
            .mount(&server)
            .await;

        let table = SheetsTable::new(reqwest::Client::new(), &config(&server.uri())).unwrap();
        let err = table.fetch_unprocessed().await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
