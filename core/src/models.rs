use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_USERNAME_LENGTH: usize = 150;
pub const MAX_PERSON_NAME_LENGTH: usize = 150;
pub const MAX_RECIPE_NAME_LENGTH: usize = 256;
pub const MAX_TAG_LENGTH: usize = 32;
pub const MAX_SLUG_LENGTH: usize = 32;
pub const MIN_COOKING_TIME: i64 = 1;
pub const MAX_COOKING_TIME: i64 = 1440;
pub const MIN_AMOUNT: i64 = 1;
pub const MAX_AMOUNT: i64 = 10_000;

// --- Collections ---

/// Which entity table a collection points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Recipe,
    User,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recipe => f.write_str("Recipe"),
            Self::User => f.write_str("User"),
        }
    }
}

/// A named per-user collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Favorite,
    Cart,
    Subscription,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 3] = [Self::Favorite, Self::Cart, Self::Subscription];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Favorite => "favorite",
            Self::Cart => "cart",
            Self::Subscription => "subscription",
        }
    }

    #[must_use]
    pub fn target_type(self) -> TargetType {
        match self {
            Self::Favorite | Self::Cart => TargetType::Recipe,
            Self::Subscription => TargetType::User,
        }
    }

    /// Whether an owner may put themselves into this collection.
    #[must_use]
    pub fn forbids_self_reference(self) -> bool {
        matches!(self, Self::Subscription)
    }

    #[must_use]
    pub fn already_exists_message(self) -> &'static str {
        match self {
            Self::Favorite => "Recipe is already in favorites",
            Self::Cart => "Recipe is already in the shopping cart",
            Self::Subscription => "You are already subscribed to this author",
        }
    }

    #[must_use]
    pub fn not_found_message(self) -> &'static str {
        match self {
            Self::Favorite => "Recipe is not in favorites",
            Self::Cart => "Recipe is not in the shopping cart",
            Self::Subscription => "You are not subscribed to this author",
        }
    }

    #[must_use]
    pub fn self_reference_message(self) -> &'static str {
        match self {
            Self::Favorite => "You cannot favorite yourself",
            Self::Cart => "You cannot add yourself to the shopping cart",
            Self::Subscription => "You cannot subscribe to yourself",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown collection kind '{s}'"))
    }
}

/// One (owner, target) pairing inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipRecord {
    pub id: i64,
    pub owner_id: i64,
    pub target_id: i64,
    pub kind: CollectionKind,
    pub created_at: String,
}

// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: String,
}

impl User {
    /// Name used in report headers.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

/// A user as seen by someone else.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

impl UserView {
    #[must_use]
    pub fn new(user: User, is_subscribed: bool) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_subscribed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorWithRecipes {
    #[serde(flatten)]
    pub author: UserView,
    pub recipes: Vec<RecipeSummary>,
    pub recipes_count: i64,
}

// --- Catalogue ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIngredient {
    pub name: String,
    pub measurement_unit: String,
}

// --- Recipes ---

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub author_id: i64,
    pub name: String,
    pub text: String,
    pub cooking_time: i64,
    pub pub_date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipeIngredient {
    #[serde(rename = "id")]
    pub ingredient_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    pub text: String,
    pub cooking_time: i64,
    pub tags: Vec<i64>,
    pub ingredients: Vec<NewRecipeIngredient>,
}

/// The short form returned after adding a recipe to a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeSummary {
    pub id: i64,
    pub name: String,
    pub cooking_time: i64,
}

impl From<&Recipe> for RecipeSummary {
    fn from(recipe: &Recipe) -> Self {
        Self {
            id: recipe.id,
            name: recipe.name.clone(),
            cooking_time: recipe.cooking_time,
        }
    }
}

/// One ingredient quantity attached to a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeIngredientLine {
    pub recipe_id: i64,
    pub ingredient_name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredientView {
    pub id: i64,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub author: UserView,
    pub ingredients: Vec<RecipeIngredientView>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub text: String,
    pub cooking_time: i64,
    pub pub_date: String,
}

/// Listing filters. The two collection flags only narrow the list when the
/// request has a viewer.
#[derive(Debug, Clone, Default)]
pub struct RecipeFilter {
    pub author: Option<i64>,
    pub tags: Vec<String>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

// --- Validation ---

fn check_length(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if value.chars().count() > max {
        return Err(ValidationError::new(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(())
}

pub fn validate_new_user(user: &NewUser) -> Result<(), ValidationError> {
    check_length("email", &user.email, MAX_EMAIL_LENGTH)?;
    if !user.email.contains('@') {
        return Err(ValidationError::new("email", "must be a valid email address"));
    }
    check_length("username", &user.username, MAX_USERNAME_LENGTH)?;
    if let Some(bad) = user
        .username
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '.' | '@' | '+' | '-' | '_')))
    {
        return Err(ValidationError::new(
            "username",
            format!("contains invalid character '{bad}'"),
        ));
    }
    check_length("first_name", &user.first_name, MAX_PERSON_NAME_LENGTH)?;
    check_length("last_name", &user.last_name, MAX_PERSON_NAME_LENGTH)?;
    Ok(())
}

pub fn validate_tag(name: &str, slug: &str) -> Result<(), ValidationError> {
    check_length("name", name, MAX_TAG_LENGTH)?;
    check_length("slug", slug, MAX_SLUG_LENGTH)?;
    if !slug
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::new(
            "slug",
            "may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<(), ValidationError> {
    check_length("name", &recipe.name, MAX_RECIPE_NAME_LENGTH)?;
    if recipe.text.trim().is_empty() {
        return Err(ValidationError::new("text", "must not be empty"));
    }
    if !(MIN_COOKING_TIME..=MAX_COOKING_TIME).contains(&recipe.cooking_time) {
        return Err(ValidationError::new(
            "cooking_time",
            format!("must be between {MIN_COOKING_TIME} and {MAX_COOKING_TIME} minutes"),
        ));
    }

    if recipe.tags.is_empty() {
        return Err(ValidationError::new("tags", "at least one tag is required"));
    }
    let mut seen = HashSet::new();
    if !recipe.tags.iter().all(|id| seen.insert(*id)) {
        return Err(ValidationError::new("tags", "tags must not repeat"));
    }

    if recipe.ingredients.is_empty() {
        return Err(ValidationError::new(
            "ingredients",
            "at least one ingredient is required",
        ));
    }
    let mut seen = HashSet::new();
    let duplicates: Vec<String> = recipe
        .ingredients
        .iter()
        .filter(|ing| !seen.insert(ing.ingredient_id))
        .map(|ing| ing.ingredient_id.to_string())
        .collect();
    if !duplicates.is_empty() {
        return Err(ValidationError::new(
            "ingredients",
            format!("ingredients repeat: {}", duplicates.join(", ")),
        ));
    }
    if let Some(bad) = recipe
        .ingredients
        .iter()
        .find(|ing| !(MIN_AMOUNT..=MAX_AMOUNT).contains(&ing.amount))
    {
        return Err(ValidationError::new(
            "amount",
            format!(
                "amount for ingredient {} must be between {MIN_AMOUNT} and {MAX_AMOUNT}",
                bad.ingredient_id
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recipe() -> NewRecipe {
        NewRecipe {
            name: "Pancakes".to_string(),
            text: "Mix and fry.".to_string(),
            cooking_time: 20,
            tags: vec![1],
            ingredients: vec![
                NewRecipeIngredient {
                    ingredient_id: 1,
                    amount: 200,
                },
                NewRecipeIngredient {
                    ingredient_id: 2,
                    amount: 2,
                },
            ],
        }
    }

    fn sample_user() -> NewUser {
        NewUser {
            email: "ann@example.com".to_string(),
            username: "ann".to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
        }
    }

    #[test]
    fn test_collection_kind_round_trips_through_text() {
        for kind in CollectionKind::ALL {
            assert_eq!(kind.as_str().parse::<CollectionKind>().unwrap(), kind);
        }
        assert!("wishlist".parse::<CollectionKind>().is_err());
    }

    #[test]
    fn test_collection_kind_targets() {
        assert_eq!(CollectionKind::Favorite.target_type(), TargetType::Recipe);
        assert_eq!(CollectionKind::Cart.target_type(), TargetType::Recipe);
        assert_eq!(CollectionKind::Subscription.target_type(), TargetType::User);
        assert!(CollectionKind::Subscription.forbids_self_reference());
        assert!(!CollectionKind::Favorite.forbids_self_reference());
        assert!(!CollectionKind::Cart.forbids_self_reference());
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let mut user = User {
            id: 1,
            email: "ann@example.com".to_string(),
            username: "ann".to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
            created_at: String::new(),
        };
        assert_eq!(user.display_name(), "Ann Lee");
        user.first_name = " ".to_string();
        user.last_name = String::new();
        assert_eq!(user.display_name(), "ann");
    }

    #[test]
    fn test_validate_new_recipe_valid() {
        assert!(validate_new_recipe(&sample_recipe()).is_ok());
    }

    #[test]
    fn test_validate_new_recipe_cooking_time_bounds() {
        let mut recipe = sample_recipe();
        recipe.cooking_time = 0;
        assert_eq!(validate_new_recipe(&recipe).unwrap_err().field, "cooking_time");
        recipe.cooking_time = 1441;
        assert_eq!(validate_new_recipe(&recipe).unwrap_err().field, "cooking_time");
        recipe.cooking_time = 1440;
        assert!(validate_new_recipe(&recipe).is_ok());
    }

    #[test]
    fn test_validate_new_recipe_requires_tags_and_ingredients() {
        let mut recipe = sample_recipe();
        recipe.tags.clear();
        assert_eq!(validate_new_recipe(&recipe).unwrap_err().field, "tags");

        let mut recipe = sample_recipe();
        recipe.ingredients.clear();
        assert_eq!(validate_new_recipe(&recipe).unwrap_err().field, "ingredients");
    }

    #[test]
    fn test_validate_new_recipe_rejects_duplicates() {
        let mut recipe = sample_recipe();
        recipe.tags = vec![1, 1];
        assert_eq!(validate_new_recipe(&recipe).unwrap_err().field, "tags");

        let mut recipe = sample_recipe();
        recipe.ingredients[1].ingredient_id = 1;
        let err = validate_new_recipe(&recipe).unwrap_err();
        assert_eq!(err.field, "ingredients");
        assert!(err.message.contains('1'));
    }

    #[test]
    fn test_validate_new_recipe_amount_bounds() {
        let mut recipe = sample_recipe();
        recipe.ingredients[0].amount = 0;
        assert_eq!(validate_new_recipe(&recipe).unwrap_err().field, "amount");
        recipe.ingredients[0].amount = 10_001;
        assert_eq!(validate_new_recipe(&recipe).unwrap_err().field, "amount");
    }

    #[test]
    fn test_validate_new_user() {
        assert!(validate_new_user(&sample_user()).is_ok());

        let mut user = sample_user();
        user.email = "not-an-email".to_string();
        assert_eq!(validate_new_user(&user).unwrap_err().field, "email");

        let mut user = sample_user();
        user.username = "ann lee".to_string();
        assert_eq!(validate_new_user(&user).unwrap_err().field, "username");

        let mut user = sample_user();
        user.last_name = "  ".to_string();
        assert_eq!(validate_new_user(&user).unwrap_err().field, "last_name");
    }

    #[test]
    fn test_new_recipe_reads_ingredient_id_field() {
        let recipe: NewRecipe = serde_json::from_str(
            r#"{"name":"Tea","text":"Steep.","cooking_time":5,"tags":[2],
                "ingredients":[{"id":7,"amount":250}]}"#,
        )
        .unwrap();
        assert_eq!(recipe.ingredients[0].ingredient_id, 7);
        assert_eq!(recipe.ingredients[0].amount, 250);
    }

    #[test]
    fn test_author_with_recipes_flattens_user() {
        let user = User {
            id: 3,
            email: "ann@example.com".to_string(),
            username: "ann".to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
            created_at: String::new(),
        };
        let value = serde_json::to_value(AuthorWithRecipes {
            author: UserView::new(user, true),
            recipes: vec![RecipeSummary {
                id: 9,
                name: "Tea".to_string(),
                cooking_time: 5,
            }],
            recipes_count: 4,
        })
        .unwrap();
        assert_eq!(value["username"], "ann");
        assert_eq!(value["is_subscribed"], true);
        assert_eq!(value["recipes"][0]["id"], 9);
        assert_eq!(value["recipes_count"], 4);
        assert!(value.get("author").is_none());
    }

    #[test]
    fn test_collection_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(CollectionKind::Subscription).unwrap(),
            "subscription"
        );
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("Breakfast", "breakfast").is_ok());
        assert_eq!(validate_tag("Lunch", "lunch time").unwrap_err().field, "slug");
        assert_eq!(validate_tag("", "x").unwrap_err().field, "name");
    }
}
