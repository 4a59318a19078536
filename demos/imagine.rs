//! Generate an image grid from a prompt, then optionally upscale it.
//!
//! Reads `MJ_API_URL` and `MJ_API_KEY` from the environment.
//!
//! ```sh
//! RUST_LOG=midjourney_rs=debug cargo run --example imagine -- "a lighthouse at dusk" --upscale
//! ```

use midjourney_rs::{Action, ImagineParams, MjClient, MjConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let upscale = args.iter().any(|a| a == "--upscale");
    let prompt = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "a lighthouse at dusk, volumetric light".to_string());

    let config = MjConfig::builder()
        .with_api_url(std::env::var("MJ_API_URL")?)
        .with_api_key(std::env::var("MJ_API_KEY")?)
        .with_max_wait(Duration::from_secs(15 * 60))
        .build()?;
    let client = MjClient::new(config).await?;
    match client.proxy() {
        Some(proxy) => println!("Downloading through {}", proxy),
        None => println!("No proxy detected"),
    }

    let prompt = ImagineParams::new(prompt).aspect_ratio("16:9").build()?;
    println!("Prompt: {}", prompt);

    let outcome = client.imagine(&prompt).await?;
    println!("Task {} finished", outcome.task_id);

    match &outcome.image {
        Some(grid) => {
            std::fs::write("grid.png", grid.encode_png()?)?;
            println!("Saved grid.png ({}x{})", grid.width, grid.height);
        }
        None => eprintln!("Task finished without an image"),
    }

    if upscale {
        let results = client
            .batch(&outcome.task_id, &Action::upscale_all())
            .await?;
        for (action, image) in Action::upscale_all().iter().zip(&results) {
            match image {
                Some(img) => {
                    let name = format!("{}.png", action.code().to_lowercase());
                    std::fs::write(&name, img.encode_png()?)?;
                    println!("Saved {}", name);
                }
                None => eprintln!("{} failed", action),
            }
        }
    }

    Ok(())
}
