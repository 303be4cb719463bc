mod commands;
mod config;
mod logging;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use crate::commands::{
    RecipeArgs, acting_user, cmd_collection_add, cmd_collection_remove, cmd_ingredient_import,
    cmd_ingredient_search, cmd_recipe_create, cmd_recipe_list, cmd_recipe_show, cmd_shopping_list,
    cmd_subscribe, cmd_subscriptions, cmd_tag_add, cmd_tag_list, cmd_unsubscribe, cmd_user_add,
    cmd_user_list, cmd_user_token,
};
use crate::config::Config;
use potluck_core::models::{CollectionKind, NewUser, RecipeFilter};
use potluck_core::service::PotluckService;

#[derive(Parser)]
#[command(
    name = "potluck",
    version,
    about = "Share recipes, keep favorites, and build shopping lists"
)]
struct Cli {
    /// Database file (overrides POTLUCK_DB and the default data directory)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Act as this user for collection commands
    #[arg(long = "as", global = true, value_name = "USERNAME")]
    as_user: Option<String>,
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage recipe tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage the ingredient catalogue
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Create and browse recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Add or remove favorite recipes
    Favorite {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Add or remove recipes in the shopping cart
    Cart {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Subscribe to an author's recipes
    Subscribe {
        /// Author's user ID
        author_id: i64,
        /// Show at most this many of the author's recipes
        #[arg(long)]
        recipes_limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Unsubscribe from an author
    Unsubscribe {
        /// Author's user ID
        author_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the authors you are subscribed to
    Subscriptions {
        /// Show at most this many recipes per author
        #[arg(long)]
        recipes_limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build the shopping list from your cart
    ShoppingList {
        /// Write to this file (or directory) instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user and print their API token
    Add {
        username: String,
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Issue a new API token for a user
    Token {
        username: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Create a tag
    Add {
        name: String,
        slug: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List tags
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// Load ingredients from a `name,unit` CSV file
    Import {
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find ingredients by name prefix
    Search {
        prefix: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a recipe authored by the --as user
    Create {
        name: String,
        /// Cooking time in minutes
        #[arg(short, long)]
        cooking_time: i64,
        /// Description and steps
        #[arg(long)]
        text: String,
        /// Tag slug (repeatable)
        #[arg(short, long = "tag", required = true)]
        tags: Vec<String>,
        /// Ingredient as <id>=<amount> (repeatable)
        #[arg(short, long = "ingredient", required = true)]
        ingredients: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe
    Show {
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes, newest first
    List {
        /// Only recipes by this user ID
        #[arg(long)]
        author: Option<i64>,
        /// Only recipes with any of these tag slugs
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Only your favorites (needs --as)
        #[arg(long)]
        favorited: bool,
        /// Only recipes in your cart (needs --as)
        #[arg(long)]
        in_cart: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// Add a recipe
    Add {
        recipe_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a recipe
    Remove {
        recipe_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    tracing::debug!(db = %config.db_path.display(), data_dir = %config.data_dir.display(), "opening database");
    let svc = PotluckService::new(&config.db_path)?;
    let as_user = cli.as_user.as_deref();
    let viewer = match as_user {
        Some(_) => Some(acting_user(&svc, as_user)?),
        None => None,
    };

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Add {
                username,
                email,
                first_name,
                last_name,
                json,
            } => cmd_user_add(
                &svc,
                &NewUser {
                    email,
                    username,
                    first_name,
                    last_name,
                },
                json,
            ),
            UserCommands::List { json } => cmd_user_list(&svc, json),
            UserCommands::Token { username, json } => cmd_user_token(&svc, &username, json),
        },
        Commands::Tag { command } => match command {
            TagCommands::Add { name, slug, json } => cmd_tag_add(&svc, &name, &slug, json),
            TagCommands::List { json } => cmd_tag_list(&svc, json),
        },
        Commands::Ingredient { command } => match command {
            IngredientCommands::Import {
                file,
                dry_run,
                json,
            } => cmd_ingredient_import(&svc, &file, dry_run, json),
            IngredientCommands::Search { prefix, json } => {
                cmd_ingredient_search(&svc, &prefix, json)
            }
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Create {
                name,
                cooking_time,
                text,
                tags,
                ingredients,
                json,
            } => {
                let author = acting_user(&svc, as_user)?;
                let args = RecipeArgs {
                    name: &name,
                    text: &text,
                    cooking_time,
                    tags: &tags,
                    ingredients: &ingredients,
                };
                cmd_recipe_create(&svc, &author, &args, json)
            }
            RecipeCommands::Show { id, json } => cmd_recipe_show(&svc, id, viewer.as_ref(), json),
            RecipeCommands::List {
                author,
                tags,
                favorited,
                in_cart,
                json,
            } => {
                if (favorited || in_cart) && viewer.is_none() {
                    anyhow::bail!("--favorited and --in-cart need --as <username>");
                }
                let filter = RecipeFilter {
                    author,
                    tags,
                    is_favorited: favorited,
                    is_in_shopping_cart: in_cart,
                };
                cmd_recipe_list(&svc, &filter, viewer.as_ref(), json)
            }
        },
        Commands::Favorite { command } => {
            run_collection(&svc, as_user, CollectionKind::Favorite, command)
        }
        Commands::Cart { command } => run_collection(&svc, as_user, CollectionKind::Cart, command),
        Commands::Subscribe {
            author_id,
            recipes_limit,
            json,
        } => {
            let owner = acting_user(&svc, as_user)?;
            cmd_subscribe(&svc, &owner, author_id, recipes_limit, json)
        }
        Commands::Unsubscribe { author_id, json } => {
            let owner = acting_user(&svc, as_user)?;
            cmd_unsubscribe(&svc, &owner, author_id, json)
        }
        Commands::Subscriptions {
            recipes_limit,
            json,
        } => {
            let owner = acting_user(&svc, as_user)?;
            cmd_subscriptions(&svc, &owner, recipes_limit, json)
        }
        Commands::ShoppingList { output, json } => {
            let owner = acting_user(&svc, as_user)?;
            cmd_shopping_list(&svc, &owner, output.as_deref(), json)
        }
        Commands::Serve { port, bind } => server::start_server(svc, port, &bind).await,
    }
}

fn run_collection(
    svc: &PotluckService,
    as_user: Option<&str>,
    kind: CollectionKind,
    command: CollectionCommands,
) -> Result<()> {
    let owner = acting_user(svc, as_user)?;
    match command {
        CollectionCommands::Add { recipe_id, json } => {
            cmd_collection_add(svc, &owner, kind, recipe_id, json)
        }
        CollectionCommands::Remove { recipe_id, json } => {
            cmd_collection_remove(svc, &owner, kind, recipe_id, json)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "potluck",
            "favorite",
            "add",
            "7",
            "--as",
            "ann",
            "--db",
            "/tmp/x.db",
        ])
        .unwrap();
        assert_eq!(cli.as_user.as_deref(), Some("ann"));
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(
            cli.command,
            Commands::Favorite {
                command: CollectionCommands::Add { recipe_id: 7, .. }
            }
        ));
    }

    #[test]
    fn test_recipe_create_requires_tags_and_ingredients() {
        assert!(Cli::try_parse_from(["potluck", "recipe", "create", "Soup", "-c", "10", "--text", "x"]).is_err());
        let cli = Cli::try_parse_from([
            "potluck", "recipe", "create", "Soup", "-c", "10", "--text", "x", "-t", "lunch", "-i", "1=200",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Recipe { .. }));
    }
}
