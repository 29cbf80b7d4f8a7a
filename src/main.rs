use fabric_core::constants;
use fabric_core::{ConnectionKind, Fabric, FabricConfig, MessageBuilder, NodeKind};
use rand::Rng;
use std::time::Duration;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    constants::print_banner();

    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match cmd {
        "run"    => { run_node().await; }
        "status" => { run_status(); }
        "config" => {
            match serde_json::to_string_pretty(&FabricConfig::from_env()) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("config: {}", e),
            }
        }
        _ => {
            println!("Fabric Core — commands:");
            println!("  run     — demo fleet + tick loop until Ctrl-C");
            println!("  status  — build the demo fleet once and print its status");
            println!("  config  — effective configuration (FABRIC_* overrides applied)");
        }
    }
}

/// Hub-and-spoke demo fleet: one orchestrator, a relay ring, workers below it.
fn build_demo_fleet(fabric: &Fabric) -> fabric_core::Result<()> {
    fabric.add_node("orchestrator-01", NodeKind::Orchestrator, ["coordination", "scheduling"], "eu-central")?;
    for (relay, region) in [("relay-eu", "eu-central"), ("relay-us", "us-east"), ("relay-ap", "ap-south")] {
        fabric.add_child_node(relay, NodeKind::Relay, ["routing", "relay", "low_latency"], region, "orchestrator-01")?;
        fabric.create_connection("orchestrator-01", relay, ConnectionKind::Direct, 1.0)?;
        for i in 1..=2 {
            let worker = format!("worker-{}-{}", &relay[6..], i);
            fabric.add_child_node(&worker, NodeKind::Worker, ["compute", "gpu"], region, relay)?;
            fabric.create_connection(relay, &worker, ConnectionKind::Direct, 0.9)?;
        }
    }
    fabric.create_connection("relay-eu", "relay-us", ConnectionKind::Bridged, 0.6)?;
    fabric.add_node("analyzer-01", NodeKind::Analyzer, ["analysis", "ml"], "eu-central")?;
    fabric.create_connection("analyzer-01", "worker-eu-1", ConnectionKind::AffinityEntangled, 0.8)?;
    fabric.add_node("storage-01", NodeKind::Storage, ["storage", "cache"], "us-east")?;
    fabric.create_connection("storage-01", "relay-us", ConnectionKind::Cached, 0.7)?;
    fabric.federate("partner-grid", "https://grid.partner.example", "grpc")?;
    Ok(())
}

fn run_status() {
    let fabric = Fabric::new(FabricConfig::from_env());
    if let Err(e) = build_demo_fleet(&fabric) {
        eprintln!("❌ demo fleet: {}", e);
        return;
    }
    println!("{}", fabric.status());
}

async fn run_node() {
    let fabric = Fabric::new(FabricConfig::from_env());
    if let Err(e) = build_demo_fleet(&fabric) {
        log::error!("❌ demo fleet: {}", e);
        return;
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    if let Err(e) = fabric.start(Some(tx)) {
        log::error!("❌ tick loop: {}", e);
        return;
    }

    let workers: Vec<String> = ["eu", "us", "ap"]
        .iter()
        .flat_map(|r| (1..=2).map(move |i| format!("worker-{}-{}", r, i)))
        .collect();
    let mut traffic = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("🛑 Ctrl-C received");
                break;
            }
            Some(msg) = rx.recv() => {
                log::info!("📬 Delivered {} via {:?} (ttl left {})", msg.message_id, msg.route, msg.ttl);
            }
            _ = traffic.tick() => {
                simulate_traffic(&fabric, &workers);
            }
        }
    }

    fabric.close().await;
    println!("{}", fabric.status());
}

/// Heartbeats, random worker load reports and one routed task per round.
fn simulate_traffic(fabric: &Fabric, workers: &[String]) {
    let mut rng = rand::thread_rng();
    for node_id in fabric.node_ids() {
        let sent = if workers.contains(&node_id) {
            fabric.update_load(&node_id, rng.gen_range(0.0..1.0))
        } else {
            fabric.heartbeat(&node_id)
        };
        if let Err(e) = sent {
            log::warn!("heartbeat from [{}]: {}", node_id, e);
        }
    }

    let target = match fabric.select_node("compute", &["gpu".to_string()], &[]) {
        Some(node) => node,
        None => {
            log::warn!("⚖️ No worker available for compute");
            return;
        }
    };
    let msg = MessageBuilder::new("orchestrator-01")
        .to(&target)
        .kind("compute")
        .payload(b"task".to_vec())
        .priority(rng.gen_range(0.0..1.0))
        .build();
    match fabric.route_message(msg) {
        Ok(out) => log::info!("📨 {} → [{}] route={:?} {:?}", out.message_id, target, out.route, out.admission),
        Err(e) => log::warn!("📨 route to [{}] failed: {}", target, e),
    }

    for s in fabric.rebalance().iter().take(3) {
        log::info!("⚖️ suggest {} → {} (gap {:.2})", s.from_node, s.to_node, s.load_gap);
    }
}
