//! Shopping list for a set of recipes, grouped by where things are bought.

use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::models::{PurchaseCategory, Recipe};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingSection {
    pub category: PurchaseCategory,
    pub items: Vec<ShoppingItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShoppingList {
    pub sections: Vec<ShoppingSection>,
}

impl ShoppingList {
    #[must_use]
    pub fn section(&self, category: PurchaseCategory) -> Option<&ShoppingSection> {
        self.sections.iter().find(|s| s.category == category)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    /// One row per item: `category,item,quantity,unit`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["category", "item", "quantity", "unit"])?;
        for section in &self.sections {
            for item in &section.items {
                let quantity = format_quantity(item.quantity);
                wtr.write_record([
                    section.category.as_str(),
                    item.name.as_str(),
                    quantity.as_str(),
                    item.unit.as_str(),
                ])?;
            }
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

/// Trim float noise from summed quantities: 400.0 prints as "400", 0.1+0.2 as "0.3".
#[must_use]
pub fn format_quantity(quantity: f64) -> String {
    let rounded = (quantity * 1000.0).round() / 1000.0;
    let text = format!("{rounded:.3}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" { "0".to_string() } else { text.to_string() }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Group and sum the ingredients of `recipes`.
///
/// Quantities merge only when the normalized name and unit both match; units
/// are never converted. Sections follow `category_order`, then any category
/// it leaves out.
#[must_use]
pub fn build<'a>(
    recipes: impl IntoIterator<Item = &'a Recipe>,
    category_order: &[PurchaseCategory],
) -> ShoppingList {
    let mut grouped: HashMap<PurchaseCategory, Vec<ShoppingItem>> = HashMap::new();
    let mut index: HashMap<(PurchaseCategory, String, String), usize> = HashMap::new();

    for ingredient in recipes.into_iter().flat_map(|r| &r.ingredients) {
        let items = grouped.entry(ingredient.category).or_default();
        let key = (
            ingredient.category,
            normalize(&ingredient.name),
            normalize(&ingredient.unit),
        );
        if let Some(&i) = index.get(&key) {
            items[i].quantity += ingredient.quantity;
        } else {
            index.insert(key, items.len());
            items.push(ShoppingItem {
                name: ingredient.name.trim().to_string(),
                quantity: ingredient.quantity,
                unit: ingredient.unit.trim().to_string(),
            });
        }
    }

    let mut order: Vec<PurchaseCategory> = Vec::with_capacity(PurchaseCategory::ALL.len());
    for &category in category_order.iter().chain(PurchaseCategory::ALL.iter()) {
        if !order.contains(&category) {
            order.push(category);
        }
    }

    let sections = order
        .into_iter()
        .filter_map(|category| {
            grouped
                .remove(&category)
                .filter(|items| !items.is_empty())
                .map(|items| ShoppingSection { category, items })
        })
        .collect();
    ShoppingList { sections }
}
