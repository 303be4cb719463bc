use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::db::Database;
use crate::error::MembershipError;
use crate::ingredient_import::{self, IngredientImportSummary};
use crate::membership::MembershipEngine;
use crate::models::{
    self, AuthorWithRecipes, CollectionKind, Ingredient, NewRecipe, NewUser, Recipe,
    RecipeDetail, RecipeFilter, RecipeSummary, Tag, User, UserView,
};
use crate::shopping_list::{AggregationReporter, ShoppingListReport};

/// Entry point shared by the CLI and the HTTP server.
///
/// Methods are synchronous; each one is a single unit of work against the
/// store. Callers running on an async runtime hold it behind a mutex.
pub struct PotluckService {
    db: Database,
}

impl PotluckService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    fn engine(&self) -> MembershipEngine<'_, Database> {
        MembershipEngine::new(&self.db)
    }

    // --- Users ---

    /// Validate and store a new user together with their first API token.
    pub fn register_user(&self, user: &NewUser, api_token: &str) -> Result<User> {
        models::validate_new_user(user)?;
        let user = self.db.insert_user(user, Some(api_token))?;
        info!(user_id = user.id, username = %user.username, "registered user");
        Ok(user)
    }

    /// Store `token` as the user's API token, replacing any previous one.
    pub fn assign_token(&self, user_id: i64, token: &str) -> Result<()> {
        if !self.db.set_user_token(user_id, token)? {
            anyhow::bail!("User {user_id} not found");
        }
        Ok(())
    }

    pub fn user_by_token(&self, token: &str) -> Result<Option<User>> {
        self.db.get_user_by_token(token)
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.db.get_user_by_username(username)
    }

    pub fn user(&self, id: i64) -> Result<Option<User>> {
        self.db.get_user(id)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    /// A user as seen by `viewer` (anonymous viewers are never subscribed).
    pub fn user_view(&self, id: i64, viewer: Option<i64>) -> Result<Option<UserView>> {
        let Some(user) = self.db.get_user(id)? else {
            return Ok(None);
        };
        let is_subscribed = self.is_subscribed(viewer, user.id)?;
        Ok(Some(UserView::new(user, is_subscribed)))
    }

    fn is_subscribed(&self, viewer: Option<i64>, author_id: i64) -> Result<bool> {
        match viewer {
            Some(viewer) => Ok(self
                .engine()
                .contains(viewer, author_id, CollectionKind::Subscription)?),
            None => Ok(false),
        }
    }

    // --- Catalogue ---

    pub fn create_tag(&self, name: &str, slug: &str) -> Result<Tag> {
        models::validate_tag(name, slug)?;
        self.db.insert_tag(name, slug)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.db.list_tags()
    }

    pub fn tag_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        self.db.get_tag_by_slug(slug)
    }

    pub fn import_ingredients(&self, csv_data: &str, dry_run: bool) -> Result<IngredientImportSummary> {
        let rows = ingredient_import::parse_ingredient_csv(csv_data.as_bytes())?;
        ingredient_import::import_ingredients(&self.db, &rows, dry_run)
    }

    pub fn search_ingredients(&self, prefix: &str) -> Result<Vec<Ingredient>> {
        self.db.search_ingredients(prefix)
    }

    // --- Recipes ---

    pub fn create_recipe(&self, author: &User, recipe: &NewRecipe) -> Result<RecipeDetail> {
        models::validate_new_recipe(recipe)?;
        let created = self.db.create_recipe(author.id, recipe)?;
        info!(recipe_id = created.id, author_id = author.id, "created recipe");
        self.detail_for(created, Some(author.id))
    }

    pub fn recipe_detail(&self, id: i64, viewer: Option<i64>) -> Result<Option<RecipeDetail>> {
        match self.db.get_recipe(id)? {
            Some(recipe) => Ok(Some(self.detail_for(recipe, viewer)?)),
            None => Ok(None),
        }
    }

    pub fn list_recipes(&self, filter: &RecipeFilter, viewer: Option<i64>) -> Result<Vec<RecipeDetail>> {
        self.db
            .list_recipes(filter, viewer)?
            .into_iter()
            .map(|recipe| self.detail_for(recipe, viewer))
            .collect()
    }

    fn detail_for(&self, recipe: Recipe, viewer: Option<i64>) -> Result<RecipeDetail> {
        let (tags, author, ingredients) = self.db.get_recipe_parts(&recipe)?;
        let is_subscribed = self.is_subscribed(viewer, author.id)?;
        let (is_favorited, is_in_shopping_cart) = match viewer {
            Some(viewer) => {
                let engine = self.engine();
                (
                    engine.contains(viewer, recipe.id, CollectionKind::Favorite)?,
                    engine.contains(viewer, recipe.id, CollectionKind::Cart)?,
                )
            }
            None => (false, false),
        };
        Ok(RecipeDetail {
            id: recipe.id,
            tags,
            author: UserView::new(author, is_subscribed),
            ingredients,
            is_favorited,
            is_in_shopping_cart,
            name: recipe.name,
            text: recipe.text,
            cooking_time: recipe.cooking_time,
            pub_date: recipe.pub_date,
        })
    }

    fn recipe_summary(&self, recipe_id: i64) -> Result<RecipeSummary, MembershipError> {
        let recipe = self
            .db
            .get_recipe(recipe_id)?
            .with_context(|| format!("Recipe {recipe_id} disappeared"))?;
        Ok(RecipeSummary::from(&recipe))
    }

    // --- Collections ---

    pub fn add_favorite(&self, owner: &User, recipe_id: i64) -> Result<RecipeSummary, MembershipError> {
        self.engine()
            .add(owner.id, recipe_id, CollectionKind::Favorite)?;
        self.recipe_summary(recipe_id)
    }

    pub fn remove_favorite(&self, owner: &User, recipe_id: i64) -> Result<(), MembershipError> {
        self.engine()
            .remove(owner.id, recipe_id, CollectionKind::Favorite)
    }

    pub fn add_to_cart(&self, owner: &User, recipe_id: i64) -> Result<RecipeSummary, MembershipError> {
        self.engine().add(owner.id, recipe_id, CollectionKind::Cart)?;
        self.recipe_summary(recipe_id)
    }

    pub fn remove_from_cart(&self, owner: &User, recipe_id: i64) -> Result<(), MembershipError> {
        self.engine().remove(owner.id, recipe_id, CollectionKind::Cart)
    }

    pub fn subscribe(
        &self,
        owner: &User,
        author_id: i64,
        recipes_limit: Option<usize>,
    ) -> Result<AuthorWithRecipes, MembershipError> {
        self.engine()
            .add(owner.id, author_id, CollectionKind::Subscription)?;
        let author = self
            .db
            .get_user(author_id)?
            .with_context(|| format!("User {author_id} disappeared"))?;
        Ok(self.author_with_recipes(author, true, recipes_limit)?)
    }

    pub fn unsubscribe(&self, owner: &User, author_id: i64) -> Result<(), MembershipError> {
        self.engine()
            .remove(owner.id, author_id, CollectionKind::Subscription)
    }

    /// Authors `viewer` follows, each with up to `recipes_limit` newest recipes.
    pub fn subscriptions(
        &self,
        viewer: &User,
        recipes_limit: Option<usize>,
    ) -> Result<Vec<AuthorWithRecipes>> {
        self.db
            .subscribed_authors(viewer.id)?
            .into_iter()
            .map(|author| self.author_with_recipes(author, true, recipes_limit))
            .collect()
    }

    fn author_with_recipes(
        &self,
        author: User,
        is_subscribed: bool,
        recipes_limit: Option<usize>,
    ) -> Result<AuthorWithRecipes> {
        let recipes = self
            .db
            .recipes_by_author(author.id, recipes_limit)?
            .iter()
            .map(RecipeSummary::from)
            .collect();
        let recipes_count = self.db.count_recipes_by_author(author.id)?;
        Ok(AuthorWithRecipes {
            author: UserView::new(author, is_subscribed),
            recipes,
            recipes_count,
        })
    }

    pub fn shopping_list(&self, owner: &User) -> Result<ShoppingListReport, MembershipError> {
        AggregationReporter::new(&self.db).build(owner)
    }
}
