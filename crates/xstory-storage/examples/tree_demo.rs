//! Demonstration of the story tree store
//!
//! Builds a small tree, drives one branch through the workflow and asks the
//! scheduler where to grow next.
//!
//! Run with: cargo run -p xstory-storage --example tree_demo

use tempfile::TempDir;
use xstory_core::{HoldReason, NewStory, Stage};
use xstory_storage::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("story-tree.db");

    println!("Demo: Story Tree");
    println!("================\n");

    let mut db = Database::open(&db_path).await?;
    db.init_schema().await?;
    db.create_root(NewStory::new("Product vision")).await?;
    db.approve("root").await?;

    println!("1. Inserting stories...");
    for title in ["User login", "Search", "Billing"] {
        let id = db.insert("root", NewStory::new(title)).await?;
        println!("   ✓ {} {}", id, title);
    }
    let oauth = db
        .insert("1", NewStory::new("OAuth provider").at_stage(Stage::Planning))
        .await?;
    println!("   ✓ {} OAuth provider", oauth);

    println!("\n2. Closure rows for {}:", oauth);
    for edge in db.ancestors_of(oauth.as_str()).await? {
        println!("   ({}, {}, {})", edge.ancestor_id, edge.descendant_id, edge.depth);
    }

    println!("\n3. Workflow...");
    db.approve("1").await?;
    db.set_hold("1", HoldReason::Queued).await?;
    let node = db.clear_hold("1").await?;
    println!("   1 is now at {} after its hold cleared", node.stage);

    println!("\n4. Scheduling...");
    for candidate in db.ranked_candidates().await? {
        println!(
            "   {} depth={} children={}/{} fill={:.2}",
            candidate.id, candidate.depth, candidate.child_count, candidate.capacity, candidate.fill_rate
        );
    }
    match db.select_next().await? {
        Some(target) => println!("   → expand {}", target.id),
        None => println!("   → nothing to expand"),
    }

    println!("\n✓ Demo complete ({} nodes, {} path rows)", db.node_count().await?, db.path_count().await?);
    Ok(())
}
