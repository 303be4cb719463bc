//! Shopping list built from a user's cart.
//!
//! Quantities are merged by `(ingredient name, measurement unit)` rather than
//! by ingredient id, so two catalogue entries that read the same end up on one
//! line. Names and units are compared byte for byte.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::error::MembershipError;
use crate::membership::{EntityLookup, MembershipEngine, MembershipStore};
use crate::models::{CollectionKind, RecipeIngredientLine, User};

pub const SHOPPING_LIST_FILENAME: &str = "shopping_list.txt";
pub const SHOPPING_LIST_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Ingredient lines belonging to a set of recipes.
pub trait IngredientLineSource {
    fn ingredient_lines_for_recipes(&self, recipe_ids: &[i64]) -> Result<Vec<RecipeIngredientLine>>;
}

/// Grouping key. Derived ordering sorts by name, then unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IngredientKey {
    pub name: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedIngredient {
    pub ingredient_name: String,
    pub measurement_unit: String,
    pub total_amount: i64,
}

/// Sum amounts per `(name, unit)` and return them in key order.
pub fn aggregate<I>(lines: I) -> Vec<AggregatedIngredient>
where
    I: IntoIterator<Item = RecipeIngredientLine>,
{
    let mut totals: BTreeMap<IngredientKey, i64> = BTreeMap::new();
    for line in lines {
        let key = IngredientKey {
            name: line.ingredient_name,
            unit: line.measurement_unit,
        };
        *totals.entry(key).or_insert(0) += line.amount;
    }
    totals
        .into_iter()
        .map(|(key, total_amount)| AggregatedIngredient {
            ingredient_name: key.name,
            measurement_unit: key.unit,
            total_amount,
        })
        .collect()
}

/// Rendered shopping list plus the hints a transport needs to offer it as a
/// download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShoppingListReport {
    pub filename: &'static str,
    pub content_type: &'static str,
    pub items: Vec<AggregatedIngredient>,
    pub body: String,
}

impl ShoppingListReport {
    pub fn new(owner: &User, items: Vec<AggregatedIngredient>) -> Self {
        let body = render(owner, &items);
        Self {
            filename: SHOPPING_LIST_FILENAME,
            content_type: SHOPPING_LIST_CONTENT_TYPE,
            items,
            body,
        }
    }

    #[must_use]
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

fn render(owner: &User, items: &[AggregatedIngredient]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Shopping list for {}", owner.display_name());
    for item in items {
        let _ = writeln!(
            out,
            "{} ({}) — {}",
            item.ingredient_name, item.measurement_unit, item.total_amount
        );
    }
    out
}

/// Builds shopping lists from the cart collection.
pub struct AggregationReporter<'a, S> {
    store: &'a S,
}

impl<'a, S> AggregationReporter<'a, S>
where
    S: MembershipStore + EntityLookup + IngredientLineSource,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn build(&self, owner: &User) -> Result<ShoppingListReport, MembershipError> {
        let recipe_ids = MembershipEngine::new(self.store).targets(owner.id, CollectionKind::Cart)?;
        let lines = self.store.ingredient_lines_for_recipes(&recipe_ids)?;
        let items = aggregate(lines);
        debug!(
            owner_id = owner.id,
            recipes = recipe_ids.len(),
            items = items.len(),
            "built shopping list"
        );
        Ok(ShoppingListReport::new(owner, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{NewIngredient, NewRecipe, NewRecipeIngredient, NewUser};

    fn line(recipe_id: i64, name: &str, unit: &str, amount: i64) -> RecipeIngredientLine {
        RecipeIngredientLine {
            recipe_id,
            ingredient_name: name.to_string(),
            measurement_unit: unit.to_string(),
            amount,
        }
    }

    fn rendered_lines(items: &[AggregatedIngredient]) -> Vec<String> {
        items
            .iter()
            .map(|i| format!("{} ({}) — {}", i.ingredient_name, i.measurement_unit, i.total_amount))
            .collect()
    }

    #[test]
    fn test_aggregate_sums_across_recipes() {
        let items = aggregate(vec![
            line(1, "Flour", "g", 200),
            line(1, "Salt", "g", 5),
            line(2, "Flour", "g", 100),
            line(2, "Sugar", "g", 50),
        ]);
        assert_eq!(
            rendered_lines(&items),
            vec!["Flour (g) — 300", "Salt (g) — 5", "Sugar (g) — 50"]
        );
    }

    #[test]
    fn test_aggregate_sums_repeats_within_one_recipe() {
        let items = aggregate(vec![line(1, "Milk", "ml", 100), line(1, "Milk", "ml", 150)]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].total_amount, 250);
    }

    #[test]
    fn test_aggregate_keys_are_case_sensitive() {
        let items = aggregate(vec![line(1, "flour", "g", 1), line(2, "Flour", "g", 2)]);
        // Uppercase sorts first in byte order.
        assert_eq!(rendered_lines(&items), vec!["Flour (g) — 2", "flour (g) — 1"]);
    }

    #[test]
    fn test_aggregate_unit_breaks_ties() {
        let items = aggregate(vec![
            line(1, "Sugar", "tbsp", 2),
            line(2, "Sugar", "g", 40),
            line(3, "Sugar", "tbsp", 1),
        ]);
        assert_eq!(rendered_lines(&items), vec!["Sugar (g) — 40", "Sugar (tbsp) — 3"]);
    }

    fn seeded() -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let owner = db
            .insert_user(
                &NewUser {
                    email: "ann@example.com".to_string(),
                    username: "ann".to_string(),
                    first_name: "Ann".to_string(),
                    last_name: "Lee".to_string(),
                },
                None,
            )
            .unwrap();
        (db, owner)
    }

    fn add_recipe(db: &Database, author: i64, tag: i64, name: &str, lines: &[(i64, i64)]) -> i64 {
        db.create_recipe(
            author,
            &NewRecipe {
                name: name.to_string(),
                text: "Stir.".to_string(),
                cooking_time: 10,
                tags: vec![tag],
                ingredients: lines
                    .iter()
                    .map(|&(ingredient_id, amount)| NewRecipeIngredient {
                        ingredient_id,
                        amount,
                    })
                    .collect(),
            },
        )
        .unwrap()
        .id
    }

    fn ingredient(db: &Database, name: &str) -> i64 {
        db.insert_ingredient(&NewIngredient {
            name: name.to_string(),
            measurement_unit: "g".to_string(),
        })
        .unwrap()
        .unwrap()
        .id
    }

    #[test]
    fn test_report_for_cart() {
        let (db, owner) = seeded();
        let tag = db.insert_tag("Baking", "baking").unwrap().id;
        let flour = ingredient(&db, "Flour");
        let salt = ingredient(&db, "Salt");
        let sugar = ingredient(&db, "Sugar");
        let a = add_recipe(&db, owner.id, tag, "A", &[(flour, 200), (salt, 5)]);
        let b = add_recipe(&db, owner.id, tag, "B", &[(flour, 100), (sugar, 50)]);
        add_recipe(&db, owner.id, tag, "Not in cart", &[(flour, 999)]);

        let engine = MembershipEngine::new(&db);
        engine.add(owner.id, a, CollectionKind::Cart).unwrap();
        engine.add(owner.id, b, CollectionKind::Cart).unwrap();
        // Favorites never reach the shopping list.
        engine.add(owner.id, a, CollectionKind::Favorite).unwrap();

        let report = AggregationReporter::new(&db).build(&owner).unwrap();
        assert_eq!(
            report.body,
            "Shopping list for Ann Lee\nFlour (g) — 300\nSalt (g) — 5\nSugar (g) — 50\n"
        );
        assert_eq!(report.filename, "shopping_list.txt");
        assert_eq!(report.content_type, "text/plain; charset=utf-8");
        assert_eq!(
            report.content_disposition(),
            "attachment; filename=\"shopping_list.txt\""
        );
    }

    #[test]
    fn test_empty_cart_is_header_only() {
        let (db, owner) = seeded();
        let report = AggregationReporter::new(&db).build(&owner).unwrap();
        assert_eq!(report.body, "Shopping list for Ann Lee\n");
        assert!(report.items.is_empty());
    }

    #[test]
    fn test_report_follows_cart_removals() {
        let (db, owner) = seeded();
        let tag = db.insert_tag("Baking", "baking").unwrap().id;
        let flour = ingredient(&db, "Flour");
        let a = add_recipe(&db, owner.id, tag, "A", &[(flour, 200)]);

        let engine = MembershipEngine::new(&db);
        engine.add(owner.id, a, CollectionKind::Cart).unwrap();
        engine.remove(owner.id, a, CollectionKind::Cart).unwrap();

        let report = AggregationReporter::new(&db).build(&owner).unwrap();
        assert!(report.items.is_empty());
    }
}
