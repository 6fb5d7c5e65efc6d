use anyhow::Context;
use blinkit_common::transport::PinConfig;
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[derive(argh::FromArgs)]
#[argh(subcommand, name = "serve")]
/// run the blinkit server to control the led strip
pub struct ServeArgs {
    #[argh(option, default = "3000")]
    /// the port to run on
    port: u16,

    #[argh(option, default = "IpAddr::V4(Ipv4Addr::UNSPECIFIED)")]
    /// address to listen on
    bind: IpAddr,

    #[argh(switch)]
    /// draw the strip in the terminal instead of driving gpio
    fake_gpio: bool,

    #[argh(option, default = "PathBuf::from(\"/sys/class/gpio\")")]
    /// sysfs gpio directory
    gpio_root: PathBuf,

    #[argh(option, default = "23")]
    /// gpio number of the data line
    data_pin: u32,

    #[argh(option, default = "24")]
    /// gpio number of the clock line
    clock_pin: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Hardware,
    Simulated,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hardware => "hardware",
            Self::Simulated => "simulated",
        })
    }
}

pub struct Config {
    pub addr: SocketAddr,
    pub secret_key: String,
    pub transport: TransportKind,
    pub pins: PinConfig,
}

impl Config {
    /// Combines the command line with `SECRET_KEY` and `FAKE_GPIO` looked up
    /// through `env`.
    pub fn resolve(args: ServeArgs, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let secret_key = env("SECRET_KEY")
            .filter(|key| !key.is_empty())
            .context("SECRET_KEY must be set")?;

        let fake_gpio = args.fake_gpio || env("FAKE_GPIO").is_some_and(|value| value == "true");
        let transport = if fake_gpio {
            TransportKind::Simulated
        } else {
            TransportKind::Hardware
        };

        anyhow::ensure!(
            args.data_pin != args.clock_pin,
            "data and clock lines must be different pins (both {})",
            args.data_pin
        );

        Ok(Self {
            addr: SocketAddr::new(args.bind, args.port),
            secret_key,
            transport,
            pins: PinConfig {
                gpio_root: args.gpio_root,
                data_pin: args.data_pin,
                clock_pin: args.clock_pin,
            },
        })
    }

    pub fn from_env(args: ServeArgs) -> anyhow::Result<Self> {
        Self::resolve(args, |key| std::env::var(key).ok())
    }
}
