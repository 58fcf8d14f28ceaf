//! Spreadsheet extraction and parsing
//!
//! [`SheetSource`] is the seam between the orchestrator and whatever serves
//! the cell grid; [`parser`] turns that grid into menu entities.

pub mod client;
pub mod parser;

use crate::error::PipelineResult;
use async_trait::async_trait;

pub use client::{GoogleSheetsClient, GoogleSheetsConfig};
pub use parser::{parse_price, parse_rows, ParsedMenu, FIRST_EXT_ID};

/// One loosely-typed spreadsheet cell
pub type Cell = serde_json::Value;
pub type Row = Vec<Cell>;

/// Source of the first sheet of a spreadsheet as a row grid
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Any failure is a parse failure; partial grids are never returned.
    async fn fetch_rows(&self, spreadsheet_id: &str) -> PipelineResult<Vec<Row>>;
}
