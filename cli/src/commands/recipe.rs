use anyhow::{Context, Result};
use std::process;

use potluck_core::models::{NewRecipe, RecipeFilter, User};
use potluck_core::service::PotluckService;

use super::helpers::{json_error, parse_ingredient_arg, print_recipe_table};

pub(crate) struct RecipeArgs<'a> {
    pub name: &'a str,
    pub text: &'a str,
    pub cooking_time: i64,
    pub tags: &'a [String],
    pub ingredients: &'a [String],
}

pub(crate) fn cmd_recipe_create(
    svc: &PotluckService,
    author: &User,
    args: &RecipeArgs<'_>,
    json: bool,
) -> Result<()> {
    let tags = args
        .tags
        .iter()
        .map(|slug| {
            svc.tag_by_slug(slug)?
                .map(|t| t.id)
                .with_context(|| format!("No tag with slug '{slug}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    let ingredients = args
        .ingredients
        .iter()
        .map(|s| parse_ingredient_arg(s))
        .collect::<Result<Vec<_>>>()?;

    let detail = svc.create_recipe(
        author,
        &NewRecipe {
            name: args.name.to_string(),
            text: args.text.to_string(),
            cooking_time: args.cooking_time,
            tags,
            ingredients,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        println!(
            "Created recipe: {} (id: {}, {} ingredients)",
            detail.name,
            detail.id,
            detail.ingredients.len()
        );
    }
    Ok(())
}

pub(crate) fn cmd_recipe_show(
    svc: &PotluckService,
    id: i64,
    viewer: Option<&User>,
    json: bool,
) -> Result<()> {
    let Some(detail) = svc.recipe_detail(id, viewer.map(|u| u.id))? else {
        if json {
            println!("{}", json_error(&format!("Recipe {id} not found")));
        } else {
            eprintln!("Recipe {id} not found");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("=== {} ===", detail.name);
    let tags: Vec<&str> = detail.tags.iter().map(|t| t.name.as_str()).collect();
    println!(
        "  By {}  |  {} min  |  {}",
        detail.author.username,
        detail.cooking_time,
        tags.join(", ")
    );
    if detail.is_favorited || detail.is_in_shopping_cart {
        let mut marks = Vec::new();
        if detail.is_favorited {
            marks.push("favorite");
        }
        if detail.is_in_shopping_cart {
            marks.push("in cart");
        }
        println!("  ({})", marks.join(", "));
    }

    println!("\n  INGREDIENTS:");
    for ing in &detail.ingredients {
        println!("    {} — {} {}", ing.name, ing.amount, ing.measurement_unit);
    }
    println!("\n  {}", detail.text.replace('\n', "\n  "));
    Ok(())
}

pub(crate) fn cmd_recipe_list(
    svc: &PotluckService,
    filter: &RecipeFilter,
    viewer: Option<&User>,
    json: bool,
) -> Result<()> {
    let recipes = svc.list_recipes(filter, viewer.map(|u| u.id))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }
    if recipes.is_empty() {
        eprintln!("No recipes found");
        return Ok(());
    }
    print_recipe_table(&recipes);
    Ok(())
}
