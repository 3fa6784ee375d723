//!
//! pathgate CLI binary
//! -------------------
//! Resolves URLs, renders public URLs, runs access checks and maintains the compiled rule
//! cache for a site rooted at a code root.

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use pathgate::access::CheckMask;
use pathgate::url_path::{format_query, parse_query};
use pathgate::{load_config, CheckKind, PathStyle, ResolverConfig, ResolverContext, ResourcePath};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file>] [--root <dir>] <command> [args]\n\nCommands:\n  resolve <url> [--defaults <query>]   map a URL to its internal path and parameters\n  url <path> [--all-servers]           render the public URL of a content path\n  check <path> <kinds>                 check access; kinds is a comma list of existence,reading,listing or 'all'\n  explain <path> <kind>                print the per-level trace of one access check as JSON\n  compile <rules-file>                 compile a rule source into the cache\n  purge-cache                          delete stale compiled rule artifacts\n\nFlags:\n  --config <file>    JSON config; PATHGATE_* environment variables override it\n  --root <dir>       code root (overrides the config)\n  -h, --help         show this help\n\nPaths:\n  Relative paths ('docs/a.txt') are taken below the content root; absolute ones\n  ('/content/docs/a.txt') are framework paths.\n\nLogging:\n  RUST_LOG controls verbosity (default: info), e.g. RUST_LOG=pathgate::access=debug"
    );
}

struct Args {
    config: Option<PathBuf>,
    root: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args(mut it: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut args = Args { config: None, root: None, command: Vec::new() };
    while let Some(a) = it.next() {
        match a.as_str() {
            "-h" | "--help" => return Ok(None),
            "--config" => args.config = Some(PathBuf::from(it.next().ok_or_else(|| anyhow!("--config needs a file"))?)),
            "--root" => args.root = Some(PathBuf::from(it.next().ok_or_else(|| anyhow!("--root needs a directory"))?)),
            _ => args.command.push(a),
        }
    }
    if args.command.is_empty() { return Ok(None); }
    Ok(Some(args))
}

fn build_config(args: &Args) -> Result<ResolverConfig> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let mut cfg = ResolverConfig::default();
            cfg.apply_env_overrides();
            cfg
        }
    };
    if let Some(root) = &args.root { cfg.code_root = root.clone(); }
    Ok(cfg)
}

fn content_path(ctx: &ResolverContext, raw: &str) -> ResourcePath {
    ctx.normalizer().to_framework_path(raw, PathStyle::Framework)
}

fn arg<'a>(rest: &'a [String], i: usize, what: &str) -> Result<&'a str> {
    rest.get(i).map(|s| s.as_str()).ok_or_else(|| anyhow!("missing {}", what))
}

fn run(ctx: &ResolverContext, command: &[String]) -> Result<ExitCode> {
    let (cmd, rest) = command.split_first().ok_or_else(|| anyhow!("missing command"))?;
    match cmd.as_str() {
        "resolve" => {
            let url = arg(rest, 0, "<url>")?;
            let defaults = match rest.iter().position(|a| a == "--defaults") {
                Some(i) => parse_query(arg(rest, i + 1, "--defaults value")?),
                None => Default::default(),
            };
            let r = ctx.router().map_url_to_path(url, &defaults)
                .with_context(|| format!("resolving {}", url))?;
            println!("path:      {}", r.path);
            println!("params:    {}", format_query(&r.params));
            println!("rewritten: {}", !r.used_no_rewriting);
        }
        "url" => {
            let path = content_path(ctx, arg(rest, 0, "<path>")?);
            let all_servers = rest.iter().any(|a| a == "--all-servers");
            let target = ctx.router().map_path_to_url(&path, &Default::default(), all_servers)
                .with_context(|| format!("rendering URL for {}", path))?;
            if all_servers {
                for host in &ctx.config().hostnames { println!("{}", target.with_host(host)); }
            } else {
                println!("{}", target.with_host(""));
            }
        }
        "check" => {
            let path = content_path(ctx, arg(rest, 0, "<path>")?);
            let raw_kinds = arg(rest, 1, "<kinds>")?;
            let mask = CheckMask::parse(raw_kinds).ok_or_else(|| anyhow!("invalid kinds '{}'", raw_kinds))?;
            let allowed = ctx.access().check(&path, mask).with_context(|| format!("checking {}", path))?;
            println!("{} {}", path, if allowed { "allowed" } else { "denied" });
            if !allowed { return Ok(ExitCode::from(2)); }
        }
        "explain" => {
            let path = content_path(ctx, arg(rest, 0, "<path>")?);
            let raw_kind = arg(rest, 1, "<kind>")?;
            let kind = CheckKind::parse(raw_kind).ok_or_else(|| anyhow!("invalid kind '{}'", raw_kind))?;
            let ex = ctx.access().explain(&path, kind).with_context(|| format!("explaining {}", path))?;
            println!("{}", serde_json::to_string_pretty(&ex)?);
        }
        "compile" => {
            let source = Path::new(arg(rest, 0, "<rules-file>")?);
            match ctx.compiler().load(source).with_context(|| format!("compiling {}", source.display()))? {
                Some(rules) => {
                    for kind in CheckKind::ALL {
                        println!("{:<10} {} rule(s)", kind.section_name(), rules.section(kind).len());
                    }
                    println!("artifact   {}", ctx.compiler().artifact_path(source)?.display());
                }
                None => println!("{}: no rules (missing or deleted)", source.display()),
            }
        }
        "purge-cache" => {
            let n = ctx.compiler().purge_stale().context("purging rule cache")?;
            println!("removed {} stale artifact(s) from {}", n, ctx.compiler().cache_dir().display());
        }
        other => bail!("unknown command '{}'", other),
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let program = env::args().next().unwrap_or_else(|| "pathgate".to_string());
    let Some(args) = parse_args(env::args().skip(1))? else {
        print_usage(&program);
        return Ok(ExitCode::from(64));
    };
    let cfg = build_config(&args)?;
    info!(target: "pathgate", "code root '{}'", cfg.code_root.display());
    let ctx = ResolverContext::new(cfg).context("initializing resolver")?;
    run(&ctx, &args.command)
}
