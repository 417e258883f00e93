//! Prompt command - one-shot prompt to the tool server.

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;
use serde::Serialize;
use serde_json::Value;

use super::Context;

/// Arguments for the prompt command.
#[derive(Args, Debug)]
pub struct PromptArgs {
    /// The prompt text to send
    #[arg(required = true)]
    pub text: String,

    /// Context object sent alongside the prompt, as JSON
    #[arg(long)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
struct PromptOutput<'a> {
    prompt: &'a str,
    response: &'a str,
}

/// Run the prompt command.
pub async fn run(args: PromptArgs, ctx: &Context) -> Result<()> {
    let context: Value = match &args.context {
        Some(text) => serde_json::from_str(text).context("--context is not valid JSON")?,
        None => Value::Object(Default::default()),
    };

    let (manager, profile) = ctx.connect().await?;

    if ctx.verbose {
        let dim = Style::new().dim();
        eprintln!(
            "{}",
            dim.apply_to(format!("Sending to: {}", profile.options.describe()))
        );
    }

    let outcome = manager.execute_prompt(&args.text, context).await;
    manager.disconnect().await;
    let response = outcome?;

    if ctx.json_output {
        let output = PromptOutput {
            prompt: &args.text,
            response: &response,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", response);
    }

    Ok(())
}
