//! Basic usage example for `SorguDB`.

use std::path::PathBuf;
use std::sync::Arc;

use sorgudb::prelude::*;
use sorgudb_key_file::{FileKeyProvider, FileKeyVault};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("SorguDB Basic Usage Example");
    println!("===========================\n");

    // Setup: initialize the key directory if it doesn't exist
    let key_dir = PathBuf::from("./example_keys");
    if !key_dir.exists() {
        println!("Initializing key directory at {}...", key_dir.display());
        FileKeyProvider::init(&key_dir)?;
        println!("✓ Key directory initialized\n");
    }

    let provider = FileKeyProvider::new(&key_dir)?;
    let vault = FileKeyVault::new(&key_dir)?;
    let keys = KeyManager::new(Arc::new(provider), Arc::new(vault));
    let engine = EncryptionEngine::new(financial_schema()?, keys);

    for key_id in engine.provision_keys()? {
        println!("✓ Provisioned {key_id}");
    }
    println!();

    // Store a few accounts
    let store = MemoryDocumentStore::new();
    let customers = [
        ("acc1", "John Doe", "1234567890", 50_000.00, "123-45-6789"),
        ("acc2", "Jane Smith", "0987654321", 75_000.00, "987-65-4321"),
        ("acc3", "Bob Johnson", "1122334455", 25_000.00, "111-22-3333"),
    ];
    let accounts = customers.map(|(id, name, number, balance, ssn)| {
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        Account::new(id, name, number, balance, ssn, email)
    });
    for account in &accounts {
        engine.save(&store, account)?;
    }
    println!("✓ Stored {} accounts\n", store.len());

    // What the store actually holds
    let stored = &store.all("accounts")?[0];
    println!("Stored document {}:", stored.id());
    for (name, value) in stored.fields() {
        match value {
            StoredValue::Plain(value) => println!("  {name}: {value:?}"),
            StoredValue::Encrypted(value) => println!(
                "  {name}: <{} under {}, {}-byte token>",
                value.strategy().name(),
                value.key_id(),
                value.token().len()
            ),
        }
    }
    println!();

    // Equality query over a deterministic field
    let by_ssn = QueryPredicate::eq(Account::SSN, "987-65-4321");
    if let Some(account) = engine.find_one::<Account>(&store, &by_ssn)? {
        println!("✓ Found by SSN: {}", account.customer_name);
    }

    // Range query over an order-preserving field
    let by_balance = QueryPredicate::between(Account::BALANCE, 30_000.0, 80_000.0);
    let rewritten = engine.rewrite_predicate(&by_balance, "accounts")?;
    println!("Rewritten predicate: {rewritten:?}\n");
    for account in engine.find::<Account>(&store, &by_balance)? {
        println!("✓ Balance in range: {} ({:.2})", account.customer_name, account.balance);
    }

    // Out-of-domain values are rejected instead of stored
    let overdrawn = Account::new(
        "acc4",
        "Eve",
        "0000000000",
        -1.0,
        "000-00-0000",
        "eve@example.com",
    );
    match engine.encrypt_entity(&overdrawn) {
        Err(err) => println!("\n✓ Rejected negative balance: {err}"),
        Ok(_) => println!("\n✗ Negative balance was accepted"),
    }

    println!("\nAll examples completed successfully!");
    Ok(())
}
