use anyhow::{Context, Result};
use tabled::{Table, Tabled, settings::Style};

use crate::config::generate_token;
use potluck_core::models::NewUser;
use potluck_core::service::PotluckService;

pub(crate) fn cmd_user_add(svc: &PotluckService, user: &NewUser, json: bool) -> Result<()> {
    let token = generate_token();
    let created = svc.register_user(user, &token)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "user": created, "token": token })
        );
    } else {
        println!("Created user {} (id: {})", created.username, created.id);
        println!("API token: {token}");
        println!("Include in requests: Authorization: Bearer {token}");
    }
    Ok(())
}

pub(crate) fn cmd_user_list(svc: &PotluckService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Username")]
        username: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Email")]
        email: String,
    }

    let users = svc.list_users()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }
    if users.is_empty() {
        eprintln!("No users yet. Create one with: potluck user add");
        return Ok(());
    }

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            username: u.username.clone(),
            name: u.display_name(),
            email: u.email.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

/// Issue a new API token, invalidating the previous one.
pub(crate) fn cmd_user_token(svc: &PotluckService, username: &str, json: bool) -> Result<()> {
    let user = svc
        .user_by_username(username)?
        .with_context(|| format!("No user named '{username}'"))?;
    let token = generate_token();
    svc.assign_token(user.id, &token)?;

    if json {
        println!("{}", serde_json::json!({ "username": user.username, "token": token }));
    } else {
        println!("New API token for {}: {token}", user.username);
    }
    Ok(())
}
