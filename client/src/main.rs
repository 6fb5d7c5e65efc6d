#[macro_use]
extern crate tracing;

use anyhow::{Context, bail};
use blinkit_common::{PIXEL_COUNT, Patch, Pixel, patch};
use reqwest::header::AUTHORIZATION;
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Pause after every request so the strip has time to show it.
const PATCH_PAUSE: Duration = Duration::from_millis(50);

const RED: Pixel = Pixel::new(0xff, 0x00, 0x00, 0x27);
const GREEN: Pixel = Pixel::new(0x00, 0xff, 0x00, 0x27);
const BLUE: Pixel = Pixel::new(0x00, 0x00, 0xff, 0x27);

#[derive(argh::FromArgs)]
/// send patches to a running blinkit server
struct Args {
    #[argh(option, default = "String::from(\"http://localhost:3000\")")]
    /// base url of the server
    url: String,

    #[argh(subcommand)]
    command: Command,
}

#[derive(argh::FromArgs)]
#[argh(subcommand)]
enum Command {
    Off(OffArgs),
    Patch(PatchArgs),
    Pulse(PulseArgs),
    Tick(TickArgs),
}

#[derive(argh::FromArgs)]
#[argh(subcommand, name = "off")]
/// turn off all leds
struct OffArgs {}

#[derive(argh::FromArgs)]
#[argh(subcommand, name = "patch")]
/// send a patch file, or list the available ones
struct PatchArgs {
    #[argh(positional)]
    /// name of the patch file, without .json
    name: Option<String>,

    #[argh(option, default = "PathBuf::from(\"patches\")")]
    /// directory holding the patch files
    dir: PathBuf,
}

#[derive(argh::FromArgs)]
#[argh(subcommand, name = "pulse")]
/// sweep a rainbow dot up and down the strip
struct PulseArgs {}

#[derive(argh::FromArgs)]
#[argh(subcommand, name = "tick")]
/// blink every led on an interval
struct TickArgs {
    #[argh(option, default = "String::from(\"ffffff25\")")]
    /// colour to blink, 8 hex digits
    colour: String,

    #[argh(option, default = "1000")]
    /// milliseconds between ticks
    interval: u64,

    #[argh(option, default = "0")]
    /// milliseconds to stay lit before going dark again
    pause: u64,
}

struct Client {
    http: reqwest::Client,
    leds_url: String,
    secret_key: String,
}

impl Client {
    fn new(url: &str, secret_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            leds_url: format!("{}/leds", url.trim_end_matches('/')),
            secret_key,
        }
    }

    async fn patch(&self, patches: &[Patch]) -> anyhow::Result<()> {
        debug!(?patches, "sending patch");

        let response = self
            .http
            .post(&self.leds_url)
            .header(AUTHORIZATION, &self.secret_key)
            .json(patches)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("server rejected patch ({status}): {body}");
        }

        tokio::time::sleep(PATCH_PAUSE).await;
        Ok(())
    }

    async fn patch_all(&self, pixel: Pixel) -> anyhow::Result<()> {
        self.patch(&patch::fill(pixel)).await
    }
}

/// Patch sets for one sweep up and back down, starting and ending dark.
fn pulse_steps() -> Vec<Vec<Patch>> {
    let colours = [RED, GREEN, BLUE];
    let mut current = 0;
    let mut next_colour = || {
        current = (current + 1) % colours.len();
        colours[current]
    };

    let last = PIXEL_COUNT as i64 - 1;
    let mut steps = vec![patch::fill(Pixel::OFF), vec![Patch::new(0, colours[0])]];

    for position in 1..=last {
        steps.push(vec![
            Patch::new(position - 1, Pixel::OFF),
            Patch::new(position, next_colour()),
        ]);
    }
    steps.push(vec![Patch::new(last, Pixel::OFF)]);

    for position in (0..last).rev() {
        steps.push(vec![
            Patch::new(position + 1, Pixel::OFF),
            Patch::new(position, next_colour()),
        ]);
    }
    steps.push(vec![Patch::new(0, Pixel::OFF)]);

    steps
}

fn available_patches(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn load_patch(dir: &Path, name: &str) -> anyhow::Result<Vec<Patch>> {
    let path = dir.join(format!("{name}.json"));
    if !path.exists() {
        bail!("Patch not found: \"{name}\"");
    }

    let contents = fs::read_to_string(&path)?;
    serde_json::from_str(&contents).with_context(|| format!("invalid patch file {}", path.display()))
}

fn parse_tick_colour(colour: &str) -> anyhow::Result<Pixel> {
    format!("#{colour}")
        .parse()
        .with_context(|| format!("'{colour}' is not an 8 digit hex"))
}

/// Resolves with the signal name on the first SIGINT or SIGTERM. Both
/// handlers are installed before this returns.
fn stop_signal() -> io::Result<impl Future<Output = &'static str>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

async fn tick(client: &Client, args: TickArgs) -> anyhow::Result<()> {
    let colour = parse_tick_colour(&args.colour)?;
    anyhow::ensure!(args.interval > 0, "interval must be at least 1ms");
    let lit_for = Duration::from_millis(args.pause);
    let mut interval = tokio::time::interval(Duration::from_millis(args.interval));
    let mut on = false;
    let stop = stop_signal()?;
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                on = !on;
                client.patch_all(if on { colour } else { Pixel::OFF }).await?;

                if !lit_for.is_zero() {
                    tokio::time::sleep(lit_for).await;
                    on = false;
                    client.patch_all(Pixel::OFF).await?;
                }
            }
            reason = &mut stop => {
                info!("{reason} received, resetting leds");
                return client.patch_all(Pixel::OFF).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args: Args = argh::from_env();

    let secret_key = std::env::var("SECRET_KEY").context("SECRET_KEY must be set")?;
    let client = Client::new(&args.url, secret_key);

    match args.command {
        Command::Off(_) => client.patch_all(Pixel::OFF).await,
        Command::Patch(PatchArgs { name: None, dir }) => {
            println!("Available patches:");
            for name in available_patches(&dir)? {
                println!(" - {name}");
            }
            Ok(())
        }
        Command::Patch(PatchArgs { name: Some(name), dir }) => {
            let patches = load_patch(&dir, &name)?;
            client.patch(&patches).await
        }
        Command::Pulse(_) => {
            for step in pulse_steps() {
                client.patch(&step).await?;
            }
            Ok(())
        }
        Command::Tick(args) => tick(&client, args).await,
    }
}
