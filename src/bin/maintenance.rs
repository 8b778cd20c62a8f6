use std::env;

use anyhow::{anyhow, Result};

use reservist_portal::{
    accounts::{insert_account, prepare_account, NewAccountFields},
    auth::password::hash_password,
    config::AppConfig,
    db,
    workflow::accounts::{AccountStatus, Role},
};

const USAGE: &str = "Usage:\n  maintenance create-admin <email> <password> <first-name> <last-name>\n  maintenance hash-password <password>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-admin") => match &args[1..] {
            [email, password, first_name, last_name] => {
                create_admin(email, password, first_name, last_name)?
            }
            _ => usage_error()?,
        },
        Some("hash-password") => match &args[1..] {
            [password] => println!("{}", hash_password(password)?),
            _ => usage_error()?,
        },
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => usage_error()?,
    }

    Ok(())
}

fn usage_error() -> Result<()> {
    eprintln!("{USAGE}");
    std::process::exit(1);
}

fn create_admin(email: &str, password: &str, first_name: &str, last_name: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    println!(
        "Using database {} to seed a super administrator",
        config.redacted_database_url()
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    let mut conn = pool
        .get()
        .map_err(|err| anyhow!("failed to get database connection: {err}"))?;

    let fields = NewAccountFields {
        email: email.to_string(),
        password: password.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
    };
    let account = prepare_account(&fields, Role::SuperAdmin, AccountStatus::Active)
        .map_err(|err| anyhow!(err.message().to_string()))?;

    let account = insert_account(&mut conn, &account)
        .map_err(|err| anyhow!(err.message().to_string()))?;

    println!("Created super administrator {} ({})", account.email, account.id);
    Ok(())
}
