use anyhow::{anyhow, Error};
use getopts::{Matches, Options};
use huntquery::access_token::{self, SERVICE_PRINCIPAL_INSTRUCTIONS};
use huntquery::config::{self, Config};
use log::*;
use logosaurus::{self, Logger, L_LEVEL, L_TIME};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    let args = env::args().collect::<Vec<String>>();
    let mut opts = config::options();
    opts.optflag("", "show-expiry", "print token expiry on stderr");

    let m = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprint!("{}\n\n", e);
            print_help(&args[0], &opts);
            process::exit(2);
        }
    };
    if m.opt_present("help") || !m.free.is_empty() {
        print_help(&args[0], &opts);
        process::exit(2);
    }

    let level = if m.opt_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = Logger::builder(std::io::stderr())
        .set_prefix("accesstoken: ")
        .set_flags(L_LEVEL | L_TIME)
        .set_level(level)
        .build();
    if let Err(e) = logosaurus::init(logger) {
        eprintln!("init logger: {}", e);
    }

    let cfg = match Config::from_matches(&m, |k| env::var(k).ok(), false) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}\n\n", e);
            print_help(&args[0], &opts);
            process::exit(2);
        }
    };

    if let Err(e) = run(&cfg, &m).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cfg: &Config, m: &Matches) -> Result<(), Error> {
    let creds = cfg
        .credentials
        .as_ref()
        .ok_or_else(|| anyhow!("no credentials configured"))?;

    let c = cfg.http_client()?;
    let tok = access_token::fetch(&c, &cfg.endpoints, creds).await?;
    println!("{}", tok.secret());
    if m.opt_present("show-expiry") {
        match tok.expires_at {
            Some(t) => eprintln!("expires {}", t.to_rfc3339()),
            None => eprintln!("expiry unknown"),
        }
    }
    Ok(())
}

fn print_help(prog: &str, opts: &Options) {
    let brief = format!("usage: {} [options]", prog);
    eprint!("{}\n", opts.usage(&brief));
    eprint!("To create a service principal:\n");
    eprint!("{}\n", SERVICE_PRINCIPAL_INSTRUCTIONS);
}
