//! `helmsman run`: Interactive, single-message or task-list session.

use helmsman_agent::{Orchestrator, SessionSummary, SystemPromptBuilder, TerminalConsole};
use helmsman_config::AppConfig;
use helmsman_core::EventBus;
use helmsman_router::ModelRouter;
use helmsman_telemetry::TelemetryEngine;
use std::sync::Arc;

pub async fn run(
    message: Option<String>,
    tasks: Vec<String>,
    fast: bool,
    live: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    let telemetry = Arc::new(TelemetryEngine::with_enabled(config.telemetry.enabled));
    let router = ModelRouter::from_config(&config, telemetry.clone());
    let providers = router.providers();
    if providers.is_empty() {
        print_missing_credentials();
        return Err("No usable model provider. See above for setup instructions.".into());
    }

    let events = Arc::new(EventBus::default());
    let registry = super::build_registry(&config, Some(events.clone())).await?;
    let servers = registry.list_servers().await.len();

    let interactive = message.is_none() && tasks.is_empty();
    let prompt = SystemPromptBuilder::new(config.agent.persona.clone())
        .load_skills(&config.agent.skills_dir);
    let skills = prompt.skill_count();

    let orchestrator = Orchestrator::new(
        Arc::new(router),
        registry.clone(),
        Arc::new(TerminalConsole::new().with_live_typing(live)),
        &config.agent,
    )
    .with_prompt(prompt)
    .with_events(events)
    .with_telemetry(telemetry.clone())
    .interactive(interactive)
    .fast(fast || config.router.fast_mode);

    if interactive {
        println!();
        println!("  Helmsman: interactive session");
        println!();
        println!("  Providers: {}", providers.join(" → "));
        println!("  Servers:   {servers} known (start them with the start_server tool)");
        println!("  Skills:    {skills} loaded");
        println!();
        println!("  Esc or Ctrl+C interrupts a running turn; type 'exit' to quit.");
    }

    let outcome = orchestrator.run(message, tasks).await;
    registry.shutdown().await;
    let summary = outcome?;

    print_summary(&summary, &telemetry);
    Ok(())
}

fn print_missing_credentials() {
    eprintln!();
    eprintln!("  ERROR: No model provider has a usable credential.");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    OPENAI_API_KEY, ANTHROPIC_API_KEY, GOOGLE_API_KEY, OPENROUTER_API_KEY");
    eprintln!();
    eprintln!("  Or configure a local provider (ollama) or an api_key in:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
}

fn print_summary(summary: &SessionSummary, telemetry: &TelemetryEngine) {
    eprintln!();
    eprintln!(
        "  Session: {} turn(s), {} tool call(s), {} cancelled",
        summary.turns, summary.tool_calls, summary.cancelled_turns
    );
    if summary.corrections > 0 || summary.supervisor_rejections > 0 {
        eprintln!(
            "  Corrections: {} lazy repl(ies), {} supervisor rejection(s)",
            summary.corrections, summary.supervisor_rejections
        );
    }
    if !summary.artifacts.is_empty() {
        eprintln!("  Artifacts: {}", summary.artifacts.join(", "));
    }

    if telemetry.is_enabled() {
        let usage = telemetry.snapshot();
        eprintln!(
            "  Model calls: {} ({} failed), {} tokens, cache hit rate {:.0}%",
            usage.llm_calls,
            usage.failed_llm_calls,
            usage.total_tokens(),
            usage.cache_hit_rate() * 100.0
        );
        for (provider, stats) in &usage.by_provider {
            eprintln!(
                "    {provider:<24} {} call(s), avg {} ms",
                stats.calls,
                stats.avg_latency_ms()
            );
        }
    }
}
