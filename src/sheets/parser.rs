//! Sheet rows to menu entities
//!
//! The export this reads is semi-structured: column 1 names a product, columns
//! 3 and 4 carry its current and previous price, column 7 lists one option per
//! row. [`parse_rows`] folds over the rows once, with one row of lookahead, and
//! keeps all of its bookkeeping in a local [`ScanState`].

use super::{Cell, Row};
use crate::domain::{
    Attribute, AttributeGroup, Menu, Product, ProductAttributes, ProductStatus,
};
use std::borrow::Cow;
use std::collections::HashSet;

/// External id of the first product in every menu
pub const FIRST_EXT_ID: u64 = 1_001_000;

const NAME_COLUMN: usize = 1;
const PRICE_COLUMN: usize = 3;
const OLD_PRICE_COLUMN: usize = 4;
const OPTION_COLUMN: usize = 7;

/// Column-1 value that marks a delivery-platform header row
const SKIPPED_NAME: &str = "Glovo";
const CATEGORY_MARKERS: [&str; 3] = ["предложения", "позиции", "Glovo"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMenu {
    pub products: Vec<Product>,
    pub attribute_groups: Vec<AttributeGroup>,
    pub attributes: Vec<Attribute>,
}

impl ParsedMenu {
    pub fn into_menu(self, restaurant_name: impl Into<String>) -> Menu {
        Menu::new(
            restaurant_name,
            self.products,
            self.attribute_groups,
            self.attributes,
        )
    }
}

/// Parse a sheet grid. Pure: the same grid always yields the same menu.
pub fn parse_rows(rows: &[Row]) -> ParsedMenu {
    rows.iter()
        .enumerate()
        .fold(ScanState::new(), |state, (index, row)| {
            state.scan_row(index, row, rows.get(index + 1))
        })
        .finish()
}

/// Strip spaces, accept a decimal comma, parse. Non-finite values are refused.
pub fn parse_price(raw: &str) -> Option<f64> {
    raw.replace(' ', "")
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite())
}

pub fn is_category_marker(text: &str) -> bool {
    CATEGORY_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Cell rendered as text; absent and null cells are empty
fn cell_text(row: &[Cell], column: usize) -> Cow<'_, str> {
    match row.get(column) {
        None | Some(Cell::Null) => Cow::Borrowed(""),
        Some(Cell::String(text)) => Cow::Borrowed(text.as_str()),
        Some(other) => Cow::Owned(other.to_string()),
    }
}

fn name_is_null(row: &[Cell]) -> bool {
    row.len() > 1 && row[NAME_COLUMN].is_null()
}

#[derive(Debug)]
struct ScanState {
    parsed: ParsedMenu,
    next_ext_id: u64,
    current_product: Option<String>,
    price: f64,
    price_old: Option<f64>,
    pending_options: Vec<String>,
    seen_attributes: HashSet<String>,
    seen_groups: HashSet<String>,
}

impl ScanState {
    fn new() -> Self {
        Self {
            parsed: ParsedMenu::default(),
            next_ext_id: FIRST_EXT_ID,
            current_product: None,
            price: 0.0,
            price_old: None,
            pending_options: Vec::new(),
            seen_attributes: HashSet::new(),
            seen_groups: HashSet::new(),
        }
    }

    fn current_name(&self) -> &str {
        self.current_product.as_deref().unwrap_or("")
    }

    fn scan_row(mut self, index: usize, row: &[Cell], next: Option<&Row>) -> Self {
        if row.len() < 2 {
            return self;
        }

        let raw_name = cell_text(row, NAME_COLUMN);
        let name = raw_name.trim();

        if !raw_name.is_empty() {
            // Whitespace-only names and platform headers drop the whole row
            if name.is_empty() || name == SKIPPED_NAME {
                return self;
            }
            self.start_product(name, row);
        }

        let option = cell_text(row, OPTION_COLUMN);
        let option = option.trim();
        if !option.is_empty() && option != self.current_name() {
            self.add_option(option);
        }

        if !name.is_empty() && name != self.current_name() && is_category_marker(name) {
            self.register_group(name);
        }

        // Only null name cells close a product; the Sheets API sends "" for
        // blank cells between option rows and those must not end it
        let next_name_null = next.is_some_and(|next| name_is_null(next));
        if index > 0 && name_is_null(row) && self.current_product.is_some() && next_name_null {
            self.finalize_current();
        }

        self
    }

    fn start_product(&mut self, name: &str, row: &[Cell]) {
        self.finalize_current();
        self.pending_options.clear();
        self.current_product = Some(name.to_string());

        if let Some(price) = parse_price(&cell_text(row, PRICE_COLUMN)) {
            self.price = price;
        }
        if let Some(price) = parse_price(&cell_text(row, OLD_PRICE_COLUMN)) {
            self.price_old = Some(price);
        }
    }

    fn add_option(&mut self, option: &str) {
        self.pending_options.push(option.to_string());

        if self.seen_attributes.insert(option.to_string()) {
            let id = format!("attr_{}", self.parsed.attributes.len());
            self.parsed.attributes.push(Attribute {
                id,
                name: option.to_string(),
                value: None,
            });
        }
    }

    fn register_group(&mut self, name: &str) {
        if self.seen_groups.insert(name.to_string()) {
            let id = format!("group_{}", self.parsed.attribute_groups.len());
            self.parsed.attribute_groups.push(AttributeGroup {
                id,
                name: name.to_string(),
                attributes: Vec::new(),
                is_required: false,
            });
        }
    }

    /// Emit the product in progress, if any, under the next external id
    fn finalize_current(&mut self) {
        let Some(name) = self.current_product.take() else {
            return;
        };

        let ext_id = self.next_ext_id;
        self.next_ext_id += 1;
        self.parsed.products.push(Product {
            ext_id: ext_id.to_string(),
            name,
            price: self.price,
            price_old: self.price_old,
            status: ProductStatus::Available,
            attributes: ProductAttributes {
                options: std::mem::take(&mut self.pending_options),
            },
        });
    }

    fn finish(mut self) -> ParsedMenu {
        self.finalize_current();
        self.parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| Value::String(c.to_string())).collect()
    }

    #[test]
    fn test_parse_price_variants() {
        assert_eq!(parse_price("9.99"), Some(9.99));
        assert_eq!(parse_price("1 299,50"), Some(1299.5));
        assert_eq!(parse_price(" 12 "), Some(12.0));
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("free"), None);
        assert_eq!(parse_price("NaN"), None);
    }

    #[test]
    fn test_category_markers() {
        assert!(is_category_marker("Специальные предложения"));
        assert!(is_category_marker("Новые позиции"));
        assert!(is_category_marker("Glovo exclusive"));
        assert!(!is_category_marker("Burgers"));
    }

    #[test]
    fn test_cell_text_renders_non_strings() {
        let cells = vec![json!(null), json!(12.5), json!(true), json!("x")];
        assert_eq!(cell_text(&cells, 0), "");
        assert_eq!(cell_text(&cells, 1), "12.5");
        assert_eq!(cell_text(&cells, 2), "true");
        assert_eq!(cell_text(&cells, 3), "x");
        assert_eq!(cell_text(&cells, 9), "");
    }

    #[test]
    fn test_single_product_with_option() {
        let rows = vec![
            row(&["", "Burger", "", "9.99", "12.99", "", "", "Spicy"]),
            row(&["", "", "", "", "", "", "", ""]),
        ];
        let parsed = parse_rows(&rows);

        assert_eq!(parsed.products.len(), 1);
        let burger = &parsed.products[0];
        assert_eq!(burger.name, "Burger");
        assert_eq!(burger.ext_id, "1001000");
        assert_eq!(burger.price, 9.99);
        assert_eq!(burger.price_old, Some(12.99));
        assert_eq!(burger.attributes.options, vec!["Spicy".to_string()]);
        assert_eq!(parsed.attributes.len(), 1);
        assert_eq!(parsed.attributes[0].id, "attr_0");
        assert_eq!(parsed.attributes[0].name, "Spicy");
    }

    #[test]
    fn test_options_accumulate_across_rows() {
        let rows = vec![
            row(&["", "Pizza", "", "15", "", "", "", "Small"]),
            row(&["", "", "", "", "", "", "", "Large"]),
            row(&["", "Pasta", "", "11", "", "", "", "Large"]),
        ];
        let parsed = parse_rows(&rows);

        assert_eq!(parsed.products.len(), 2);
        assert_eq!(parsed.products[0].attributes.options, vec!["Small", "Large"]);
        assert_eq!(parsed.products[1].ext_id, "1001001");
        assert_eq!(parsed.products[1].attributes.options, vec!["Large"]);
        let names: Vec<_> = parsed.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Small", "Large"]);
        assert_eq!(parsed.attributes[1].id, "attr_1");
    }

    #[test]
    fn test_glovo_row_is_skipped_entirely() {
        let rows = vec![
            row(&["", "Soup", "", "5", "", "", "", ""]),
            row(&["", "Glovo", "", "99", "", "", "", "Ignored"]),
            row(&["", "Salad", "", "6", "", "", "", ""]),
        ];
        let parsed = parse_rows(&rows);

        let names: Vec<_> = parsed.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Soup", "Salad"]);
        assert_eq!(parsed.products[0].price, 5.0);
        assert!(parsed.attributes.is_empty());
    }

    #[test]
    fn test_whitespace_name_skips_row() {
        let rows = vec![
            row(&["", "Soup", "", "5", "", "", "", ""]),
            row(&["", "   ", "", "", "", "", "", "Hidden"]),
        ];
        let parsed = parse_rows(&rows);
        assert!(parsed.products[0].attributes.is_empty());
        assert!(parsed.attributes.is_empty());
    }

    #[test]
    fn test_unparseable_price_keeps_previous_value() {
        let rows = vec![
            row(&["", "Tea", "", "3,50", "4", "", "", ""]),
            row(&["", "Coffee", "", "n/a", "", "", "", ""]),
        ];
        let parsed = parse_rows(&rows);
        assert_eq!(parsed.products[1].price, 3.5);
        assert_eq!(parsed.products[1].price_old, Some(4.0));
    }

    fn null_name_row(option: &str) -> Row {
        let mut cells = row(&["", "", "", "", "", "", "", option]);
        cells[NAME_COLUMN] = Value::Null;
        cells
    }

    #[test]
    fn test_null_name_pair_finalizes_product() {
        let rows = vec![
            row(&["", "Cake", "", "7", "", "", "", ""]),
            null_name_row(""),
            null_name_row(""),
            null_name_row("Orphan"),
        ];
        let parsed = parse_rows(&rows);

        assert_eq!(parsed.products.len(), 1);
        assert!(parsed.products[0].attributes.is_empty());
        // Options seen with no product in progress still register globally
        assert_eq!(parsed.attributes.len(), 1);
        assert_eq!(parsed.attributes[0].name, "Orphan");
    }

    #[test]
    fn test_empty_string_names_keep_product_open() {
        let rows = vec![
            row(&["", "Pizza", "", "15", "", "", "", "Small"]),
            row(&["", "", "", "", "", "", "", "Medium"]),
            row(&["", "", "", "", "", "", "", "Large"]),
            row(&["", "", "", "", "", "", "", "Family"]),
            row(&["", "Pasta", "", "11", "", "", "", ""]),
        ];
        let parsed = parse_rows(&rows);

        assert_eq!(parsed.products.len(), 2);
        assert_eq!(
            parsed.products[0].attributes.options,
            vec!["Small", "Medium", "Large", "Family"]
        );
        assert!(parsed.products[1].attributes.is_empty());
    }

    #[test]
    fn test_null_name_needs_a_following_null_name() {
        let rows = vec![
            row(&["", "Cake", "", "7", "", "", "", ""]),
            null_name_row("Cream"),
            row(&["", "", "", "", "", "", "", "Berries"]),
        ];
        let parsed = parse_rows(&rows);

        assert_eq!(parsed.products.len(), 1);
        assert_eq!(parsed.products[0].attributes.options, vec!["Cream", "Berries"]);
    }

    #[test]
    fn test_short_rows_are_ignored() {
        let rows = vec![
            vec![],
            vec![json!("only one cell")],
            row(&["", "Wrap", "", "8"]),
        ];
        let parsed = parse_rows(&rows);
        assert_eq!(parsed.products.len(), 1);
        assert_eq!(parsed.products[0].price, 8.0);
    }

    #[test]
    fn test_numeric_cells() {
        let rows = vec![vec![
            json!(null),
            json!("Fries"),
            json!(null),
            json!(4.5),
            json!(5),
        ]];
        let parsed = parse_rows(&rows);
        assert_eq!(parsed.products[0].price, 4.5);
        assert_eq!(parsed.products[0].price_old, Some(5.0));
    }

    #[test]
    fn test_option_equal_to_product_name_is_ignored() {
        let rows = vec![row(&["", "Lemonade", "", "2", "", "", "", "Lemonade"])];
        let parsed = parse_rows(&rows);
        assert!(parsed.products[0].attributes.is_empty());
        assert!(parsed.attributes.is_empty());
    }

    #[test]
    fn test_empty_grid() {
        assert_eq!(parse_rows(&[]), ParsedMenu::default());
    }

    #[test]
    fn test_into_menu() {
        let menu = parse_rows(&[row(&["", "Burger", "", "9.99"])]).into_menu("Cafe");
        assert_eq!(menu.restaurant_id, "Cafe");
        assert_eq!(menu.products.len(), 1);
    }

    fn arb_cell() -> impl Strategy<Value = Cell> {
        prop_oneof![
            Just(Value::Null),
            Just(json!("")),
            Just(json!("Glovo")),
            Just(json!("Новые позиции")),
            "[A-Za-z ]{1,8}".prop_map(Value::String),
            "[0-9]{1,3}(,[0-9]{2})?".prop_map(Value::String),
        ]
    }

    fn arb_grid() -> impl Strategy<Value = Vec<Row>> {
        prop::collection::vec(prop::collection::vec(arb_cell(), 0..9), 0..24)
    }

    proptest! {
        #[test]
        fn parsing_is_deterministic(grid in arb_grid()) {
            prop_assert_eq!(parse_rows(&grid), parse_rows(&grid.clone()));
        }

        #[test]
        fn ext_ids_are_sequential_from_base(grid in arb_grid()) {
            let parsed = parse_rows(&grid);
            for (offset, product) in parsed.products.iter().enumerate() {
                prop_assert_eq!(product.ext_id.clone(), (FIRST_EXT_ID + offset as u64).to_string());
            }
        }

        #[test]
        fn product_names_are_never_blank_or_sentinel(grid in arb_grid()) {
            for product in parse_rows(&grid).products {
                prop_assert!(!product.name.trim().is_empty());
                prop_assert_ne!(product.name.as_str(), SKIPPED_NAME);
            }
        }

        #[test]
        fn attribute_ids_follow_registration_order(grid in arb_grid()) {
            let parsed = parse_rows(&grid);
            for (index, attribute) in parsed.attributes.iter().enumerate() {
                prop_assert_eq!(attribute.id.clone(), format!("attr_{index}"));
            }
        }
    }
}
