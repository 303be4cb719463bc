use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use potluck_core::error::MembershipError;
use potluck_core::models::{AuthorWithRecipes, NewRecipeIngredient, RecipeDetail, User};
use potluck_core::service::PotluckService;

/// Resolve `--as <username>` to a user, required by every collection command.
pub(crate) fn acting_user(svc: &PotluckService, username: Option<&str>) -> Result<User> {
    let Some(username) = username else {
        bail!("This command needs an acting user. Pass --as <username>");
    };
    svc.user_by_username(username)?
        .with_context(|| format!("No user named '{username}'"))
}

/// Unwrap a collection result. Conflicts print their message and exit with
/// status 2; missing targets and store faults propagate.
pub(crate) fn or_exit_on_conflict<T>(result: Result<T, MembershipError>, json: bool) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_conflict() => {
            if json {
                println!("{}", json_error(&err.to_string()));
            } else {
                eprintln!("{err}");
            }
            process::exit(2);
        }
        Err(MembershipError::Store(err)) => Err(err),
        Err(err) => Err(err.into()),
    }
}

/// Parse `<ingredient id>=<amount>`.
pub(crate) fn parse_ingredient_arg(s: &str) -> Result<NewRecipeIngredient> {
    let (id, amount) = s
        .split_once('=')
        .with_context(|| format!("Invalid ingredient '{s}'. Use <id>=<amount>, e.g. 12=200"))?;
    let ingredient_id: i64 = id
        .trim()
        .parse()
        .with_context(|| format!("Invalid ingredient id in '{s}'"))?;
    let amount: i64 = amount
        .trim()
        .parse()
        .with_context(|| format!("Invalid amount in '{s}'"))?;
    Ok(NewRecipeIngredient {
        ingredient_id,
        amount,
    })
}

pub(crate) fn print_recipe_table(recipes: &[RecipeDetail]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Author")]
        author: String,
        #[tabled(rename = "Min")]
        cooking_time: i64,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Fav")]
        favorited: &'static str,
        #[tabled(rename = "Cart")]
        in_cart: &'static str,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 35),
            author: r.author.username.clone(),
            cooking_time: r.cooking_time,
            tags: r
                .tags
                .iter()
                .map(|t| t.slug.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            favorited: if r.is_favorited { "*" } else { "" },
            in_cart: if r.is_in_shopping_cart { "*" } else { "" },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_author_table(authors: &[AuthorWithRecipes]) {
    #[derive(Tabled)]
    struct AuthorRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Username")]
        username: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Recipes")]
        recipes_count: i64,
        #[tabled(rename = "Latest")]
        latest: String,
    }

    let rows: Vec<AuthorRow> = authors
        .iter()
        .map(|a| AuthorRow {
            id: a.author.id,
            username: a.author.username.clone(),
            name: format!("{} {}", a.author.first_name, a.author.last_name),
            recipes_count: a.recipes_count,
            latest: truncate(
                &a.recipes
                    .iter()
                    .map(|r| r.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                40,
            ),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
