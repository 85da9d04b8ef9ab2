use anyhow::{bail, Context, Error};
use getopts::{Matches, Options};
use huntquery::access_token::{self, AccessToken, SERVICE_PRINCIPAL_INSTRUCTIONS};
use huntquery::config::{self, Config};
use huntquery::hunting;
use huntquery::output::{self, Format};
use log::*;
use logosaurus::{self, Logger, L_LEVEL, L_TIME};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::process;

#[tokio::main]
async fn main() {
    let args = env::args().collect::<Vec<String>>();
    let mut opts = config::options();
    opts.optopt("", "token", "use this bearer token, skip acquisition", "TOKEN");
    opts.optopt("", "query-file", "read the query from a file", "PATH");
    opts.optopt("f", "format", "output format: json, jsonl, tsv", "FORMAT");

    let m = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => usage_error(&args[0], &opts, e),
    };
    if m.opt_present("help") || m.free.len() > 1 {
        print_help(&args[0], &opts);
        process::exit(2);
    }
    if m.opt_present("query-file") && !m.free.is_empty() {
        usage_error(&args[0], &opts, QUERY_CONFLICT);
    }

    let level = if m.opt_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = Logger::builder(std::io::stderr())
        .set_prefix("huntquery: ")
        .set_flags(L_LEVEL | L_TIME)
        .set_level(level)
        .build();
    if let Err(e) = logosaurus::init(logger) {
        eprintln!("init logger: {}", e);
    }

    let cfg = match Config::from_matches(&m, |k| env::var(k).ok(), true) {
        Ok(cfg) => cfg,
        Err(e) => usage_error(&args[0], &opts, e),
    };
    let format = match m.opt_str("format") {
        Some(s) => match s.parse::<Format>() {
            Ok(f) => f,
            Err(e) => usage_error(&args[0], &opts, e),
        },
        None => Format::default(),
    };

    if let Err(e) = run(&cfg, &m, format).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cfg: &Config, m: &Matches, format: Format) -> Result<(), Error> {
    let query = read_query(m, io::stdin())?;
    let c = cfg.http_client()?;

    let tok = match (&cfg.token, &cfg.credentials) {
        (Some(t), _) => AccessToken::new(t.as_str()),
        (None, Some(creds)) => {
            let tok = access_token::fetch(&c, &cfg.endpoints, creds)
                .await
                .context("acquire token")?;
            match tok.expires_at {
                Some(t) => debug!("token expires {}", t.to_rfc3339()),
                None => debug!("token expiry unknown"),
            }
            tok
        }
        (None, None) => bail!("no token or credentials configured"),
    };

    let rsp = hunting::run_query(&c, &cfg.endpoints.api_url, &tok, &query)
        .await
        .context("run query")?;

    let stdout = io::stdout();
    let mut w = stdout.lock();
    output::write(&mut w, format, &rsp).context("write results")?;
    Ok(())
}

const QUERY_CONFLICT: &str = "give the query either as an argument or with --query-file, not both";

/// The query comes from --query-file, else the positional argument, else
/// `stdin` (also when the argument is "-").
fn read_query<R: Read>(m: &Matches, mut stdin: R) -> Result<String, Error> {
    if let Some(path) = m.opt_str("query-file") {
        if !m.free.is_empty() {
            bail!(QUERY_CONFLICT);
        }
        return fs::read_to_string(&path).with_context(|| format!("read {}", path));
    }
    match m.free.first().map(String::as_str) {
        Some("-") | None => {
            let mut buf = String::new();
            stdin
                .read_to_string(&mut buf)
                .context("read query from stdin")?;
            Ok(buf)
        }
        Some(q) => Ok(q.to_string()),
    }
}

fn usage_error<E: std::fmt::Display>(prog: &str, opts: &Options, e: E) -> ! {
    eprint!("{}\n\n", e);
    print_help(prog, opts);
    process::exit(2);
}

fn print_help(prog: &str, opts: &Options) {
    let brief = format!(
        "usage: {} [options] [QUERY]\n\nQUERY is read from stdin when omitted or \"-\".",
        prog
    );
    eprint!("{}\n", opts.usage(&brief));
    eprint!("To create a service principal:\n");
    eprint!("{}\n", SERVICE_PRINCIPAL_INSTRUCTIONS);
}
