//! Walk through a recorded behavior-tree trace: follow it live, pause, scrub
//! back and forth, and print what a debugger panel would show.
//!
//! Run with:
//!   cargo run --example replay_walkthrough -p canopy-replay [trace.json]
//!
//! Without an argument a small utility-AI trace is generated in memory.
//! Set `RUST_LOG=canopy_replay=debug` to see rebuilds, clamps and
//! classification decisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use canopy_replay::prelude::*;

// ---------------------------------------------------------------------------
// Demo trace
// ---------------------------------------------------------------------------

fn demo_tree() -> anyhow::Result<Arc<BehaviorTree>> {
    let utility = NodeFlags::COMPOSITE | NodeFlags::SELECTOR | NodeFlags::UTILITY;
    let scorer = NodeFlags::DECORATOR | NodeFlags::UTILITY;
    let tree = TreeBuilder::new()
        .node(1, "Brain", utility, None)
        .node(2, "ScoreForage", scorer, Some(1))
        .node(3, "Forage", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, Some(2))
        .node(4, "FindFood", NodeFlags::LEAF | NodeFlags::ACTION, Some(3))
        .node(5, "Eat", NodeFlags::LEAF | NodeFlags::TIME_BASED, Some(3))
        .node(6, "ScoreRest", scorer, Some(1))
        .node(7, "Rest", NodeFlags::LEAF | NodeFlags::ACTION | NodeFlags::STATEFUL, Some(6))
        .build()?;
    Ok(Arc::new(tree))
}

fn demo_ticks() -> Vec<Tick> {
    (1..=12u64)
        .map(|id| {
            let hunger = 1.0 - id as f64 / 12.0;
            let fatigue = id as f64 / 12.0;
            let mut tick = Tick::new(id, Some(id as f64 / 60.0)).with_event(
                NodeEvent::new(1, NodeResult::Running)
                    .with_state(DisplayState::Scores(vec![hunger, fatigue]))
                    .with_cpu_time(0.08),
            );
            if hunger >= fatigue {
                tick = tick
                    .with_event(NodeEvent::new(2, NodeResult::Running))
                    .with_event(NodeEvent::new(3, NodeResult::Running).with_cpu_time(0.05))
                    .with_event(NodeEvent::new(4, NodeResult::Success).with_cpu_time(0.02))
                    .with_event(NodeEvent::new(5, NodeResult::Running).with_cpu_time(0.01))
                    .with_ref_event(RefEvent {
                        node_id: Some(4),
                        ref_name: "food".into(),
                        value: serde_json::json!({"x": id, "y": 3}),
                        is_async: false,
                    });
            } else {
                let state = BTreeMap::from([(
                    "sleptFor".to_owned(),
                    StateValue::Number((id - 6) as f64),
                )]);
                tick = tick
                    .with_event(NodeEvent::new(6, NodeResult::Running))
                    .with_event(
                        NodeEvent::new(7, NodeResult::Running)
                            .with_state(DisplayState::Record(state))
                            .with_cpu_time(0.01),
                    );
            }
            tick
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

fn print_frame(title: &str, frame: &SessionFrame) {
    println!("== {title} ==");
    println!(
        "  mode {:?}, tick {:?} of {:?}..{:?}, now {:?} (epoch: {})",
        frame.view.mode,
        frame.view.viewed_tick_id,
        frame.view.oldest_tick_id,
        frame.view.newest_tick_id,
        frame.view.viewed_now,
        frame.view.now_is_timestamp,
    );
    for node in &frame.graph.nodes {
        let stale = if node.view.display_state_is_stale { " (stale)" } else { "" };
        println!(
            "  [{}] {:<10} {:<9} state {}{}",
            node.host_id,
            node.name,
            node.view
                .result
                .map(|r| format!("{r:?}"))
                .unwrap_or_else(|| "-".into()),
            node.view
                .display_state
                .as_ref()
                .and_then(|s| serde_json::to_string(s).ok())
                .unwrap_or_else(|| "-".into()),
            stale,
        );
        for row in &node.stacked_decorators {
            println!(
                "        @{} {:<12} state {}",
                row.node_id,
                row.name,
                row.view
                    .display_state
                    .as_ref()
                    .and_then(|s| serde_json::to_string(s).ok())
                    .unwrap_or_else(|| "-".into()),
            );
        }
    }
    let highlighted: Vec<&str> = frame
        .graph
        .edges
        .iter()
        .filter(|e| e.is_on_activity_path)
        .map(|e| e.id.as_str())
        .collect();
    println!(
        "  reused {}/{} nodes, active edges {:?}",
        frame.graph.stats.nodes_reused,
        frame.graph.nodes.len(),
        highlighted
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let (tree, ticks) = match std::env::args().nth(1) {
        Some(path) => load_trace_file(path)?,
        None => (demo_tree()?, demo_ticks()),
    };

    let mut session = DebugSession::new(ReplayConfig {
        hot_node_limit: 3,
        ..ReplayConfig::default()
    });

    // Live: feed the buffer a few ticks at a time.
    let mut frame = session.update(Some(&tree), &[]);
    for end in (4..=ticks.len()).step_by(4) {
        frame = session.update(Some(&tree), &ticks[..end]);
    }
    if ticks.len() % 4 != 0 {
        frame = session.update(Some(&tree), &ticks);
    }
    print_frame("live", &frame);

    if let Some(branch) = frame.activity.branches.first() {
        println!("  following branch {}", branch.labels.join(" > "));
        session.select_activity_tail(Some(branch.tail_node_id));
    }

    // Paused: scrub back towards the start.
    session.step_back();
    session.step_back();
    let paused = session.update(Some(&tree), &ticks);
    print_frame("two ticks back", &paused);

    if let Some(oldest) = paused.view.oldest_tick_id {
        session.go_to_tick(oldest);
        let first = session.update(Some(&tree), &ticks);
        print_frame("oldest retained tick", &first);
    }

    let perf = session.performance();
    println!("== performance at {:?} ==", perf.tick_id);
    for hot in &perf.hot_nodes {
        println!(
            "  {:<10} total {:.3} ms, mean {:.3} ms, {:.0}% of root",
            hot.name,
            hot.total_cpu_time,
            hot.mean_cpu_time,
            hot.share_of_root * 100.0
        );
    }
    for frame in &perf.frames {
        println!(
            "  {}{} [{:.3} +{:.3}]",
            "  ".repeat(frame.depth as usize),
            frame.name,
            frame.start,
            frame.duration
        );
    }

    session.jump_to_live();
    let live = session.update(Some(&tree), &ticks);
    println!("back to live at tick {:?}", live.view.viewed_tick_id);
    Ok(())
}
