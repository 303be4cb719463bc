use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};

use crate::error::ValidationError;
use crate::membership::{EntityLookup, InsertOutcome, MembershipStore};
use crate::models::{
    CollectionKind, Ingredient, MembershipRecord, NewIngredient, NewRecipe, NewUser, Recipe,
    RecipeFilter, RecipeIngredientLine, RecipeIngredientView, Tag, TargetType, User,
};
use crate::shopping_list::IngredientLineSource;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, created_at";
const RECIPE_COLUMNS: &str = "r.id, r.author_id, r.name, r.text, r.cooking_time, r.pub_date";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    username TEXT NOT NULL UNIQUE,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    api_token TEXT UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    slug TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    measurement_unit TEXT NOT NULL,
                    UNIQUE (name, measurement_unit)
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    text TEXT NOT NULL,
                    cooking_time INTEGER NOT NULL CHECK (cooking_time BETWEEN 1 AND 1440),
                    pub_date TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_tags (
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (recipe_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    amount INTEGER NOT NULL CHECK (amount BETWEEN 1 AND 10000),
                    UNIQUE (recipe_id, ingredient_id)
                );

                CREATE TABLE IF NOT EXISTS memberships (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    target_id INTEGER NOT NULL,
                    kind TEXT NOT NULL CHECK (kind IN ('favorite', 'cart', 'subscription')),
                    created_at TEXT NOT NULL,
                    UNIQUE (owner_id, target_id, kind),
                    CHECK (kind <> 'subscription' OR owner_id <> target_id)
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_author ON recipes(author_id);
                CREATE INDEX IF NOT EXISTS idx_recipes_pub_date ON recipes(pub_date);
                CREATE INDEX IF NOT EXISTS idx_ingredients_name ON ingredients(name);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_memberships_target ON memberships(kind, target_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn recipe_from_row(row: &Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            author_id: row.get(1)?,
            name: row.get(2)?,
            text: row.get(3)?,
            cooking_time: row.get(4)?,
            pub_date: row.get(5)?,
        })
    }

    fn tag_from_row(row: &Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
        })
    }

    fn ingredient_from_row(row: &Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            measurement_unit: row.get(2)?,
        })
    }

    // Expects columns: 0: id, 1: owner_id, 2: target_id, 3: kind, 4: created_at
    fn membership_from_row(row: &Row) -> rusqlite::Result<MembershipRecord> {
        let kind: String = row.get(3)?;
        let kind = kind.parse::<CollectionKind>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?;
        Ok(MembershipRecord {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            target_id: row.get(2)?,
            kind,
            created_at: row.get(4)?,
        })
    }

    // --- Users ---

    /// Insert a user, storing `api_token` in the same row when given.
    pub fn insert_user(&self, user: &NewUser, api_token: Option<&str>) -> Result<User> {
        let now = timestamp();
        let inserted = self.conn.execute(
            "INSERT INTO users (email, username, first_name, last_name, api_token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.email.trim(),
                user.username.trim(),
                user.first_name.trim(),
                user.last_name.trim(),
                api_token,
                now
            ],
        );
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(ValidationError::new(
                    "username",
                    "a user with this username or email already exists",
                )
                .into());
            }
            return Err(err.into());
        }
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User vanished after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE api_token = ?1"),
                params![token],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_user_token(&self, user_id: i64, token: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET api_token = ?1 WHERE id = ?2",
            params![token, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Authors `owner_id` is subscribed to, by username.
    pub fn subscribed_authors(&self, owner_id: i64) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.email, u.username, u.first_name, u.last_name, u.created_at
             FROM users u
             JOIN memberships m ON m.target_id = u.id
             WHERE m.owner_id = ?1 AND m.kind = 'subscription'
             ORDER BY u.username",
        )?;
        let users = stmt
            .query_map(params![owner_id], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // --- Tags ---

    pub fn insert_tag(&self, name: &str, slug: &str) -> Result<Tag> {
        let inserted = self.conn.execute(
            "INSERT INTO tags (name, slug) VALUES (?1, ?2)",
            params![name.trim(), slug.trim()],
        );
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(ValidationError::new("slug", "a tag with this name or slug already exists").into());
            }
            return Err(err.into());
        }
        Ok(Tag {
            id: self.conn.last_insert_rowid(),
            name: name.trim().to_string(),
            slug: slug.trim().to_string(),
        })
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, slug FROM tags ORDER BY name")?;
        let tags = stmt
            .query_map([], Self::tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn get_tag_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, name, slug FROM tags WHERE slug = ?1",
                params![slug],
                Self::tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    fn recipe_tags(&self, recipe_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.slug FROM tags t
             JOIN recipe_tags rt ON rt.tag_id = t.id
             WHERE rt.recipe_id = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![recipe_id], Self::tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    // --- Ingredients ---

    /// Returns `None` when an ingredient with the same name and unit exists.
    pub fn insert_ingredient(&self, ingredient: &NewIngredient) -> Result<Option<Ingredient>> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO ingredients (name, measurement_unit) VALUES (?1, ?2)",
            params![ingredient.name, ingredient.measurement_unit],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Ok(Some(Ingredient {
            id: self.conn.last_insert_rowid(),
            name: ingredient.name.clone(),
            measurement_unit: ingredient.measurement_unit.clone(),
        }))
    }

    /// Insert a batch in one transaction; returns how many were new.
    pub fn insert_ingredients(&self, ingredients: &[NewIngredient]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO ingredients (name, measurement_unit) VALUES (?1, ?2)",
            )?;
            for ingredient in ingredients {
                inserted += stmt.execute(params![ingredient.name, ingredient.measurement_unit])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Option<Ingredient>> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT id, name, measurement_unit FROM ingredients WHERE id = ?1",
                params![id],
                Self::ingredient_from_row,
            )
            .optional()?;
        Ok(ingredient)
    }

    /// Ingredients whose name starts with `prefix` (ASCII case-insensitive).
    pub fn search_ingredients(&self, prefix: &str) -> Result<Vec<Ingredient>> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{escaped}%");
        let mut stmt = self.conn.prepare(
            "SELECT id, name, measurement_unit FROM ingredients
             WHERE name LIKE ?1 ESCAPE '\\'
             ORDER BY name, measurement_unit",
        )?;
        let ingredients = stmt
            .query_map(params![pattern], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    // --- Recipes ---

    /// Create a recipe with its tags and ingredient lines in one transaction.
    ///
    /// Unknown tag or ingredient ids are reported as [`ValidationError`]s and
    /// nothing is written.
    pub fn create_recipe(&self, author_id: i64, recipe: &NewRecipe) -> Result<Recipe> {
        for tag_id in &recipe.tags {
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?1)",
                params![tag_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(ValidationError::new("tags", format!("tag {tag_id} does not exist")).into());
            }
        }
        for ing in &recipe.ingredients {
            if self.get_ingredient(ing.ingredient_id)?.is_none() {
                return Err(ValidationError::new(
                    "ingredients",
                    format!("ingredient {} does not exist", ing.ingredient_id),
                )
                .into());
            }
        }

        let now = timestamp();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO recipes (author_id, name, text, cooking_time, pub_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                author_id,
                recipe.name.trim(),
                recipe.text,
                recipe.cooking_time,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();
        for tag_id in &recipe.tags {
            tx.execute(
                "INSERT INTO recipe_tags (recipe_id, tag_id) VALUES (?1, ?2)",
                params![id, tag_id],
            )?;
        }
        for ing in &recipe.ingredients {
            tx.execute(
                "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) VALUES (?1, ?2, ?3)",
                params![id, ing.ingredient_id, ing.amount],
            )?;
        }
        tx.commit()?;

        self.get_recipe(id)?.context("Recipe vanished after insert")
    }

    pub fn get_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    /// Tags, author and ingredient lines for one recipe.
    pub fn get_recipe_parts(
        &self,
        recipe: &Recipe,
    ) -> Result<(Vec<Tag>, User, Vec<RecipeIngredientView>)> {
        let tags = self.recipe_tags(recipe.id)?;
        let author = self
            .get_user(recipe.author_id)?
            .with_context(|| format!("Author {} of recipe {} missing", recipe.author_id, recipe.id))?;

        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.measurement_unit, ri.amount
             FROM recipe_ingredients ri
             JOIN ingredients i ON i.id = ri.ingredient_id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe.id], |row| {
                Ok(RecipeIngredientView {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    measurement_unit: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((tags, author, ingredients))
    }

    /// Recipes matching `filter`, newest first. The favorite and cart flags
    /// only apply when `viewer` is set.
    pub fn list_recipes(&self, filter: &RecipeFilter, viewer: Option<i64>) -> Result<Vec<Recipe>> {
        let mut sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(author) = filter.author {
            sql.push_str(" AND r.author_id = ?");
            values.push(Value::Integer(author));
        }

        if !filter.tags.is_empty() {
            let placeholders = vec!["?"; filter.tags.len()].join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM recipe_tags rt JOIN tags t ON t.id = rt.tag_id
                   WHERE rt.recipe_id = r.id AND t.slug IN ({placeholders}))"
            ));
            values.extend(filter.tags.iter().cloned().map(Value::Text));
        }

        if let Some(viewer) = viewer {
            for (wanted, kind) in [
                (filter.is_favorited, CollectionKind::Favorite),
                (filter.is_in_shopping_cart, CollectionKind::Cart),
            ] {
                if wanted {
                    sql.push_str(
                        " AND EXISTS (SELECT 1 FROM memberships m
                           WHERE m.owner_id = ? AND m.target_id = r.id AND m.kind = ?)",
                    );
                    values.push(Value::Integer(viewer));
                    values.push(Value::Text(kind.as_str().to_string()));
                }
            }
        }

        sql.push_str(" ORDER BY r.pub_date DESC, r.id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let recipes = stmt
            .query_map(params_from_iter(values), Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn recipes_by_author(&self, author_id: i64, limit: Option<usize>) -> Result<Vec<Recipe>> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r
             WHERE r.author_id = ?1
             ORDER BY r.pub_date DESC, r.id DESC
             LIMIT ?2"
        ))?;
        let recipes = stmt
            .query_map(params![author_id, limit], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn count_recipes_by_author(&self, author_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM recipes WHERE author_id = ?1",
            params![author_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl EntityLookup for Database {
    fn entity_exists(&self, target: TargetType, id: i64) -> Result<bool> {
        let sql = match target {
            TargetType::Recipe => "SELECT EXISTS(SELECT 1 FROM recipes WHERE id = ?1)",
            TargetType::User => "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        };
        let exists = self.conn.query_row(sql, params![id], |row| row.get(0))?;
        Ok(exists)
    }
}

impl MembershipStore for Database {
    fn find_membership(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<Option<MembershipRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, owner_id, target_id, kind, created_at FROM memberships
                 WHERE owner_id = ?1 AND target_id = ?2 AND kind = ?3",
                params![owner_id, target_id, kind.as_str()],
                Self::membership_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_membership(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<InsertOutcome> {
        let now = timestamp();
        let inserted = self.conn.execute(
            "INSERT INTO memberships (owner_id, target_id, kind, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![owner_id, target_id, kind.as_str(), now],
        );
        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted(MembershipRecord {
                id: self.conn.last_insert_rowid(),
                owner_id,
                target_id,
                kind,
                created_at: now,
            })),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Duplicate),
            Err(err) if is_check_violation(&err) => Ok(InsertOutcome::SelfReference),
            Err(err) => Err(err).context("failed to insert membership"),
        }
    }

    fn delete_membership(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM memberships WHERE owner_id = ?1 AND target_id = ?2 AND kind = ?3",
            params![owner_id, target_id, kind.as_str()],
        )?;
        Ok(rows)
    }

    fn membership_targets(&self, owner_id: i64, kind: CollectionKind) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id FROM memberships WHERE owner_id = ?1 AND kind = ?2 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![owner_id, kind.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

impl IngredientLineSource for Database {
    fn ingredient_lines_for_recipes(&self, recipe_ids: &[i64]) -> Result<Vec<RecipeIngredientLine>> {
        if recipe_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; recipe_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ri.recipe_id, i.name, i.measurement_unit, ri.amount
             FROM recipe_ingredients ri
             JOIN ingredients i ON i.id = ri.ingredient_id
             WHERE ri.recipe_id IN ({placeholders})
             ORDER BY ri.recipe_id, ri.id"
        ))?;
        let lines = stmt
            .query_map(params_from_iter(recipe_ids.iter()), |row| {
                Ok(RecipeIngredientLine {
                    recipe_id: row.get(0)?,
                    ingredient_name: row.get(1)?,
                    measurement_unit: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn constraint_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Some(e.extended_code)
        }
        _ => None,
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        constraint_code(err),
        Some(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn is_check_violation(err: &rusqlite::Error) -> bool {
    constraint_code(err) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK)
}
