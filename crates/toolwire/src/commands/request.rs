//! Request command - send a raw request and print the result.

use anyhow::{Context as _, Result};
use clap::Args;
use serde_json::Value;

use super::Context;

/// Arguments for the request command.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Method name
    #[arg(required = true)]
    pub method: String,

    /// Parameters as JSON
    pub params: Option<String>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Run the request command.
pub async fn run(args: RequestArgs, ctx: &Context) -> Result<()> {
    let params: Option<Value> = args
        .params
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("params are not valid JSON")?;

    let (manager, _) = ctx.connect().await?;

    let outcome = match args.timeout {
        Some(secs) => {
            let request = manager.new_request(&args.method, params)?;
            manager
                .send_request_with_timeout(request, std::time::Duration::from_secs(secs))
                .await
        }
        None => manager.request(&args.method, params).await,
    };
    manager.disconnect().await;
    let result = outcome.with_context(|| format!("request '{}' failed", args.method))?;

    if ctx.json_output {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
