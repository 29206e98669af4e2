use replayscan_core::Paths;
use replayscan_storage::SessionStore;

/// Print a stored session manifest.
pub async fn run(session_id: &str, json: bool) -> anyhow::Result<()> {
    let store = SessionStore::new(Paths::new());
    let manifest = store.load_manifest(session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("Session {} ({})", manifest.session_id, manifest.target_url);
    println!("Created {}", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    println!(
        "{:<5} {:<7} {:<10} {:<18} {:<7} {:<6} {}",
        "STEP", "PARENT", "ACTION", "FLOW", "TOKENS", "VIOLS", "URL"
    );
    for step in &manifest.steps {
        let parent = step
            .parent_step
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let flow = if step.excluded {
            format!("{} (excl)", step.flow_type)
        } else {
            step.flow_type.to_string()
        };
        println!(
            "{:<5} {:<7} {:<10} {:<18} {:<7} {:<6} {}",
            step.step_number,
            parent,
            step.action_kind.as_str(),
            flow,
            step.token_estimate,
            step.violation_count,
            step.url
        );
        for change in &step.aria_changes {
            println!("      aria: {}", change);
        }
    }

    println!();
    println!("Action groups:");
    for group in &manifest.action_groups {
        println!(
            "  #{} {} steps {}-{} ({} tokens){}",
            group.group_id,
            group.flow_type,
            group.start_step,
            group.end_step,
            group.token_estimate,
            if group.relevant { "" } else { " [skipped]" }
        );
    }

    let opt = &manifest.llm_optimization;
    println!();
    println!(
        "Excluded {} of {} steps (auth {}, error {}); {} of {} tokens kept",
        opt.excluded_steps,
        opt.total_steps,
        opt.excluded_auth_steps,
        opt.excluded_error_steps,
        opt.included_tokens,
        opt.total_tokens
    );
    Ok(())
}
