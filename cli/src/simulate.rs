use std::sync::Arc;

use msgwin_core::message_list::indexes::safe_message_id_index;
use msgwin_core::{
    init_logging, load_app_config, AppConfig, ChatView, HeadlessViewport, InMemoryBackend,
    ViewportGeometry, WindowSummary,
};

use crate::cli::{CliError, SimulateArgs, Step};

const CHAT_ID: u32 = 1;

#[derive(serde::Serialize)]
struct StepReport<'a> {
    step: &'a str,
    outcome: Option<String>,
    #[serde(flatten)]
    window: WindowSummary,
}

pub fn simulate(json: bool, verbose: bool, args: SimulateArgs) -> Result<(), CliError> {
    let config = match &args.data_dir {
        Some(dir) => load_app_config(dir),
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides(|k| std::env::var(k).ok());
            config
        }
    };
    let filter = if verbose {
        Some("debug")
    } else {
        config.log_filter.as_deref()
    };
    init_logging(args.data_dir.as_deref().unwrap_or(""), filter);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Window(format!("runtime: {e}")))?;
    rt.block_on(run(json, &config, args))
}

async fn run(json: bool, config: &AppConfig, args: SimulateArgs) -> Result<(), CliError> {
    let backend = Arc::new(InMemoryBackend::new().with_day_markers(args.day_markers));
    let seeded = backend.seed_chat(CHAT_ID, args.messages);
    if let Some(pos) = args.unread_at {
        let id = seeded
            .get(pos)
            .ok_or_else(|| CliError::Usage(format!("--unread-at {pos} out of range")))?;
        backend.mark_unread(&[*id]);
    }
    let events = backend.events();
    let viewport = HeadlessViewport::new(args.viewport_height, args.message_height);
    let mut view = ChatView::new(backend.clone(), viewport, config);

    let outcome = view.select_chat(CHAT_ID).await;
    report(json, "select", Some(format!("{outcome:?}")), view.summary());

    for step in &args.steps {
        let label = format!("{step:?}");
        let outcome = match step {
            Step::Scroll(px) => view.scroll_by(*px).await,
            Step::Top => {
                let top = view.viewport().list_metrics().scroll_top;
                view.scroll_by(-top).await
            }
            Step::Bottom => {
                let m = view.viewport().list_metrics();
                view.scroll_by(m.scroll_height - m.scroll_top).await
            }
            Step::Send(text) => Some(view.send_message(CHAT_ID, text.clone()).await),
            Step::Receive(text) => {
                backend.receive(CHAT_ID, text.clone());
                None
            }
            Step::Jump(pos) => {
                let id = message_at(&view, *pos)?;
                Some(view.jump_to_message(CHAT_ID, id).await)
            }
            Step::Delete(pos) => {
                let id = message_at(&view, *pos)?;
                Some(view.delete_message(id).await)
            }
        };
        view.drain_events(&events).await;
        report(json, &label, outcome.map(|o| format!("{o:?}")), view.summary());
    }
    Ok(())
}

fn message_at(
    view: &ChatView<InMemoryBackend, HeadlessViewport>,
    pos: i64,
) -> Result<u32, CliError> {
    let state = view.state();
    if state.message_ids.is_empty() {
        return Err(CliError::Usage(format!("no message at position {pos}")));
    }
    Ok(state.message_ids[safe_message_id_index(pos, state.message_ids.len())])
}

fn report(json: bool, step: &str, outcome: Option<String>, window: WindowSummary) {
    if json {
        let line = StepReport {
            step,
            outcome,
            window,
        };
        match serde_json::to_string(&line) {
            Ok(s) => println!("{s}"),
            Err(e) => tracing::error!(%e, "failed to encode report"),
        }
        return;
    }
    println!(
        "{step:<24} {outcome:<10} pages=[{}] mounted={}/{} scroll={:.0}/{:.0} first_visible={} away={}",
        window.pages.join(" "),
        window.mounted,
        window.total,
        window.scroll_top,
        window.scroll_height,
        window
            .first_visible
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into()),
        window.away_from_newest,
        outcome = outcome.unwrap_or_else(|| "-".into()),
    );
}
