use anyhow::{Result, bail};

use potluck_core::models::{CollectionKind, User};
use potluck_core::service::PotluckService;

use super::helpers::{or_exit_on_conflict, print_author_table};

fn place(kind: CollectionKind) -> &'static str {
    if kind == CollectionKind::Cart {
        "the shopping cart"
    } else {
        "favorites"
    }
}

pub(crate) fn cmd_collection_add(
    svc: &PotluckService,
    owner: &User,
    kind: CollectionKind,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    let result = match kind {
        CollectionKind::Favorite => svc.add_favorite(owner, recipe_id),
        CollectionKind::Cart => svc.add_to_cart(owner, recipe_id),
        CollectionKind::Subscription => bail!("Use `potluck subscribe` for authors"),
    };
    let summary = or_exit_on_conflict(result, json)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Added {} (id: {}) to {}", summary.name, summary.id, place(kind));
    }
    Ok(())
}

pub(crate) fn cmd_collection_remove(
    svc: &PotluckService,
    owner: &User,
    kind: CollectionKind,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    let result = match kind {
        CollectionKind::Favorite => svc.remove_favorite(owner, recipe_id),
        CollectionKind::Cart => svc.remove_from_cart(owner, recipe_id),
        CollectionKind::Subscription => bail!("Use `potluck unsubscribe` for authors"),
    };
    or_exit_on_conflict(result, json)?;

    if json {
        println!("{}", serde_json::json!({ "removed": recipe_id, "kind": kind }));
    } else {
        println!("Removed recipe {recipe_id} from {}", place(kind));
    }
    Ok(())
}

pub(crate) fn cmd_subscribe(
    svc: &PotluckService,
    owner: &User,
    author_id: i64,
    recipes_limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let author = or_exit_on_conflict(svc.subscribe(owner, author_id, recipes_limit), json)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&author)?);
    } else {
        println!(
            "Subscribed to {} ({} recipes)",
            author.author.username, author.recipes_count
        );
    }
    Ok(())
}

pub(crate) fn cmd_unsubscribe(
    svc: &PotluckService,
    owner: &User,
    author_id: i64,
    json: bool,
) -> Result<()> {
    or_exit_on_conflict(svc.unsubscribe(owner, author_id), json)?;
    if json {
        println!("{}", serde_json::json!({ "unsubscribed": author_id }));
    } else {
        println!("Unsubscribed from user {author_id}");
    }
    Ok(())
}

pub(crate) fn cmd_subscriptions(
    svc: &PotluckService,
    owner: &User,
    recipes_limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let authors = svc.subscriptions(owner, recipes_limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&authors)?);
        return Ok(());
    }
    if authors.is_empty() {
        eprintln!("Not subscribed to anyone yet");
        return Ok(());
    }
    print_author_table(&authors);
    Ok(())
}
