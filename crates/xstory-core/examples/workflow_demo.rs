//! Walk a story through the workflow and show how keyword matching scores
//! a commit message against it.
//!
//! Run with: cargo run -p xstory-core --example workflow_demo

use xstory_core::*;

fn main() -> Result<()> {
    println!("=== xstory Workflow Demo ===\n");

    let id = StoryId::parse("1.2")?;
    println!("Story {} (parent {:?}, depth {})", id, id.parent().map(|p| p.to_string()), id.depth());

    let mut state = WorkflowState::new(Stage::Concept);
    let events = [
        WorkflowEvent::Advance,
        WorkflowEvent::SetHold(HoldReason::Queued),
        WorkflowEvent::ClearHold,
        WorkflowEvent::Advance,
    ];

    for event in events {
        let (next, effects) = transition(id.as_str(), state, event)?;
        println!("{:<28} -> {:<12} {:?}", format!("{:?}", event), next.stage, effects);
        state = next;
    }
    println!();

    for (stage, reason) in [
        (Stage::Concept, HoldReason::Conflicted),
        (Stage::Planning, HoldReason::Queued),
        (Stage::Reviewing, HoldReason::Polish),
    ] {
        println!(
            "A {} hold at {} resolves by {:?}",
            reason,
            stage,
            reason.resolution(stage)
        );
    }
    println!();

    match transition(id.as_str(), state, WorkflowEvent::SetStage(Stage::Released)) {
        Ok(_) => println!("unexpected: skip accepted"),
        Err(err) => println!("Skipping ahead is rejected: {}", err),
    }

    println!("\n=== Keyword Matching ===\n");
    let story = extract_keywords("Login story: auth");
    let commit = extract_keywords("fix login story 1.2 auth bug");
    println!("story keywords:  {:?}", story);
    println!("commit keywords: {:?}", commit);
    println!("jaccard:         {:.2}", jaccard(&story, &commit));

    Ok(())
}
