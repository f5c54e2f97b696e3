//! `tabsync demo`: the sync scenarios against an in-memory backend.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use extension_runtime::{run_demo, DEMO_EMAIL};
use sync_config_and_utils::Config;

pub async fn demo(config: &Config, format: &OutputFormat) -> Result<()> {
    let steps = run_demo(config).await?;

    match format {
        OutputFormat::Text => {
            println!("Demo account: {}", DEMO_EMAIL);
            for step in &steps {
                output::print_heading(&step.step);
                output::print_row("Extension", &step.canonical);
                output::print_row("Web page", &step.page_session);
                output::print_row("Popup", &format!("{:?}", step.popup_state));
                output::print_row("Popup email", step.popup_email.as_deref().unwrap_or("-"));
                output::print_row("Popup sent", &step.popup_outbound.to_string());
                output::print_row("Bridge sent", &step.bridge_forwarded.to_string());
            }
        }
        OutputFormat::Json => output::print_json(&steps)?,
    }
    Ok(())
}
