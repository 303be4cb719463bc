mod catalog;
mod collection;
mod helpers;
mod recipe;
mod shopping;
mod user;

pub(crate) use catalog::{cmd_ingredient_import, cmd_ingredient_search, cmd_tag_add, cmd_tag_list};
pub(crate) use collection::{
    cmd_collection_add, cmd_collection_remove, cmd_subscribe, cmd_subscriptions, cmd_unsubscribe,
};
pub(crate) use helpers::acting_user;
pub(crate) use recipe::{RecipeArgs, cmd_recipe_create, cmd_recipe_list, cmd_recipe_show};
pub(crate) use shopping::cmd_shopping_list;
pub(crate) use user::{cmd_user_add, cmd_user_list, cmd_user_token};
