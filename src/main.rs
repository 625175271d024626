use haus_voice::audio::list_input_devices;
use haus_voice::backend::{HttpDataRpc, StaticDataRpc};
use haus_voice::demo::{TypedInputSimulator, DEMO_SCRIPT};
use haus_voice::provider::{create_provider, session, RealtimeProvider};
use haus_voice::settings;
use haus_voice::state::Conversation;
use haus_voice::tools::{default_registry, UiBridge};
use std::sync::Arc;
use tokio::sync::watch;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("live") => run_live(),
        Some("devices") => {
            for name in list_input_devices() {
                println!("{}", name);
            }
        }
        Some("demo") => {
            let phrase = if args.len() > 1 {
                args[1..].join(" ")
            } else {
                DEMO_SCRIPT[0].to_string()
            };
            run_demo(&phrase);
        }
        Some(other) => {
            eprintln!("unknown command: {}", other);
            print_usage();
        }
        None => print_usage(),
    }
}

fn print_usage() {
    println!("haus-voice: voice concierge session layer");
    println!();
    println!("  haus-voice demo [\"phrase\"]   replay a typed phrase through the simulator");
    println!("  haus-voice live              start a realtime voice session");
    println!("  haus-voice devices           list capture devices");
}

/// Replay a phrase through the typed-input simulator, printing each
/// parameter change as it lands.
fn run_demo(phrase: &str) {
    println!("[demo] phrase: {}", phrase);
    let mut simulator = TypedInputSimulator::new(phrase);
    while let Some(step) = simulator.step() {
        if !step.changed.is_empty() {
            println!("[demo] \"{}\"", step.typed);
            println!("[demo]   set {:?}", step.changed);
        }
    }

    // The typed phrase lands in the transcript the same way a spoken turn
    // would, with a locally-minted id.
    let mut conversation = Conversation::new();
    conversation.push_user_text(phrase);
    for message in &conversation.messages {
        println!("[transcript] {:?}: {}", message.role, message.text());
    }
    match serde_json::to_string_pretty(simulator.params()) {
        Ok(json) => println!("[demo] final parameters:\n{}", json),
        Err(e) => eprintln!("[demo] failed to render parameters: {}", e),
    }

    // The demo backend answers the same search the live path would run.
    let rpc = StaticDataRpc::with_demo_listings();
    if let Some(location) = simulator.params().location.clone() {
        if let Ok(results) = haus_voice::backend::DataRpc::query(
            &rpc,
            "properties:search",
            serde_json::json!({ "location": location }),
        ) {
            let count = results.as_array().map(|a| a.len()).unwrap_or(0);
            println!("[demo] {} canned listings match", count);
        }
    }
}

/// Connect to the realtime backend and run a conversation until the model
/// ends it or the user hits Ctrl-C.
fn run_live() {
    let settings = settings::load();
    let provider = create_provider(&settings.provider);
    println!("[haus-voice] provider: {}", provider.name());

    let ui = UiBridge::new();
    let registry = match HttpDataRpc::new(&settings.data_rpc_url) {
        Ok(rpc) => Arc::new(default_registry(Arc::new(rpc), ui.clone())),
        Err(e) => {
            eprintln!("[haus-voice] data RPC unavailable ({}), using canned listings", e);
            Arc::new(default_registry(
                Arc::new(StaticDataRpc::with_demo_listings()),
                ui.clone(),
            ))
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[haus-voice] failed to create runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("[haus-voice] stopping");
                let _ = stop_tx.send(true);
            }
        });

        let mut conversation = Conversation::new();
        let result =
            session::run_session(provider, &settings, registry, &mut conversation, stop_rx).await;

        // Status area: the last fatal condition, whether it aborted the
        // connect or surfaced mid-session.
        if let Some(ref error) = conversation.error {
            eprintln!("[haus-voice] error: {}", error);
        } else if let Err(e) = result {
            eprintln!("[haus-voice] session ended with error: {}", e);
        }

        // Transcript and parameters survive the session for display.
        for message in &conversation.messages {
            println!("[transcript] {:?}: {}", message.role, message.text());
        }
        if !conversation.params.is_empty() {
            if let Ok(json) = serde_json::to_string_pretty(&conversation.params) {
                println!("[haus-voice] accumulated search parameters:\n{}", json);
            }
        }
        if let Some(page) = ui.current_page() {
            println!("[haus-voice] last navigation target: {}", page);
        }
    });
}
