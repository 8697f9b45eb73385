//! vibetxn - runs a two-phase commit across in-memory stores

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use parking_lot::Mutex;
use vibetxn::resource::{shared, Call, MemoryStore, ResourceManager};
use vibetxn::transaction::{TransactionManager, TransactionStatus};

/// vibetxn - commit a batch of writes across several stores
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of stores taking part in the transaction
    #[arg(short, long, default_value = "3")]
    stores: usize,

    /// Protocol call that should fail
    #[arg(short = 'f', long, value_enum)]
    fail_at: Option<Call>,

    /// Index of the store that fails (defaults to the last one)
    #[arg(long)]
    fail_store: Option<usize>,

    /// Take a savepoint, write more, then roll back before committing
    #[arg(long)]
    savepoint: bool,

    /// User recorded on the transaction
    #[arg(short, long, default_value = "demo")]
    user: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.stores == 0 {
        bail!("at least one store is required");
    }
    let fail_store = args.fail_store.unwrap_or(args.stores - 1);
    if fail_store >= args.stores {
        bail!("--fail-store {} is out of range", fail_store);
    }

    // Join in reverse so the commit order visibly differs from join order.
    let stores: Vec<Arc<Mutex<MemoryStore>>> = (0..args.stores)
        .rev()
        .map(|i| {
            let store = MemoryStore::new(format!("store-{:02}", i));
            match args.fail_at {
                Some(call) if i == fail_store => shared(store.fail_on(call)),
                _ => shared(store),
            }
        })
        .collect();

    let manager = Arc::new(TransactionManager::new());
    let mut txn = manager.begin();
    txn.set_user(&args.user);
    txn.note("demo batch");
    txn.add_after_commit_hook(|ok| {
        println!("after-commit hook: success = {}", ok);
        Ok(())
    });

    for store in &stores {
        store.lock().set("balance", "100");
        txn.join(store.clone()).context("Failed to join store")?;
    }

    if args.savepoint {
        let sp = txn.savepoint(false).context("Failed to take savepoint")?;
        for store in &stores {
            store.lock().set("balance", "-1");
        }
        sp.rollback(&mut txn).context("Failed to roll back")?;
    }

    let outcome = txn.commit();
    println!("{} finished as {}", txn.id(), txn.status());

    for store in stores.iter().rev() {
        let store = store.lock();
        let calls: Vec<_> = store.journal().iter().map(Call::as_str).collect();
        println!(
            "  {}: committed = {:?}, calls = [{}]",
            store.name(),
            store.committed(),
            calls.join(", ")
        );
    }

    match outcome {
        Ok(()) => Ok(()),
        Err(e) if txn.status() == TransactionStatus::CommitFailed => {
            Err(anyhow::Error::new(e).context("commit failed"))
        }
        Err(e) => Err(e.into()),
    }
}
