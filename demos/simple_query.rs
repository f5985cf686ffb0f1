//! Runs a small transaction against the database named by `TXKIT_DB_*`
//! (or `.env`), falling back to an in-memory SQLite database.
//!
//! ```sh
//! RUST_LOG=txkit=debug cargo run --example simple_query
//! ```

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use txkit::{args, connect, ConnectionDescriptor, Driver, TxHandler};

#[derive(Debug, Deserialize)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let descriptor = match ConnectionDescriptor::from_env() {
        Ok(descriptor) => descriptor,
        Err(_) => ConnectionDescriptor::sqlite(":memory:"),
    };
    println!("connecting to {}", descriptor);

    let handler = TxHandler::new(connect(&descriptor).await?);

    let mut setup = handler.scope();
    handler
        .execute(
            &mut setup,
            "CREATE TABLE IF NOT EXISTS demo_accounts (id BIGINT PRIMARY KEY, owner TEXT NOT NULL, balance BIGINT NOT NULL)",
            &[],
        )
        .await?;
    handler.execute(&mut setup, "DELETE FROM demo_accounts", &[]).await?;
    for (id, owner, balance) in [(1, "ann", 100), (2, "bo", 50), (3, "cy", 0)] {
        handler
            .execute(
                &mut setup,
                "INSERT INTO demo_accounts (id, owner, balance) VALUES (?, ?, ?)",
                &args![id, owner, balance],
            )
            .await?;
    }
    handler.commit(&mut setup).await?;

    // Move 25 from ann to bo in one transaction
    let mut transfer = handler.scope();
    handler
        .execute(
            &mut transfer,
            "UPDATE demo_accounts SET balance = balance - ? WHERE id = ?",
            &args![25, 1],
        )
        .await?;
    handler
        .execute(
            &mut transfer,
            "UPDATE demo_accounts SET balance = balance + ? WHERE id = ?",
            &args![25, 2],
        )
        .await?;
    let accounts: Vec<Account> = handler
        .select_in(
            &mut transfer,
            "SELECT id, owner, balance FROM demo_accounts WHERE id IN (?) ORDER BY id",
            &args![1, 2],
        )
        .await?;
    handler.commit(&mut transfer).await?;

    for account in &accounts {
        println!("{:>3} {:<6} {:>5}", account.id, account.owner, account.balance);
    }

    handler.driver().close().await?;
    Ok(())
}
