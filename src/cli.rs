use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

pub(crate) const USAGE: &str = "\
usage: pydbg [options] <script.py> [script args...]

options:
  --attach HOST:PORT   attach to an already listening debugpy
  --python PATH        interpreter that runs debugpy and the script
  --break FILE:LINE    set a breakpoint before starting (repeatable)
  --install-missing    install debugpy with pip when it is missing
  -h, --help           show this help
";

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub attach: Option<(String, u16)>,
    pub python: Option<PathBuf>,
    pub breakpoints: Vec<(PathBuf, i64)>,
    pub install_missing: bool,
    pub script: PathBuf,
    pub script_args: Vec<String>,
}

/// Parse arguments (without the program name). `Ok(None)` means help was
/// requested.
pub(crate) fn parse_args<I>(args: I) -> Result<Option<CliArgs>>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut attach = None;
    let mut python = None;
    let mut breakpoints = Vec::new();
    let mut install_missing = false;

    let script = loop {
        let Some(arg) = args.next() else {
            bail!("missing script\n\n{USAGE}");
        };
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--attach" => {
                let value = args.next().context("--attach needs HOST:PORT")?;
                attach = Some(parse_host_port(&value)?);
            }
            "--python" => {
                python = Some(PathBuf::from(args.next().context("--python needs a path")?));
            }
            "--break" => {
                let value = args.next().context("--break needs FILE:LINE")?;
                breakpoints.push(parse_location(&value)?);
            }
            "--install-missing" => install_missing = true,
            "--" => break PathBuf::from(args.next().context("missing script after --")?),
            other if other.starts_with('-') => bail!("unknown option {other}\n\n{USAGE}"),
            script => break PathBuf::from(script),
        }
    };

    Ok(Some(CliArgs {
        attach,
        python,
        breakpoints,
        install_missing,
        script,
        script_args: args.collect(),
    }))
}

pub(crate) fn parse_host_port(value: &str) -> Result<(String, u16)> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected HOST:PORT, got {value:?}"))?;
    if host.is_empty() {
        bail!("expected HOST:PORT, got {value:?}");
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port in {value:?}"))?;
    Ok((host.to_string(), port))
}

/// Parse `FILE:LINE`. The split is on the last colon so Windows drive
/// letters survive.
pub(crate) fn parse_location(value: &str) -> Result<(PathBuf, i64)> {
    let (file, line) = value
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected FILE:LINE, got {value:?}"))?;
    let line = line
        .parse::<i64>()
        .ok()
        .filter(|line| *line > 0)
        .ok_or_else(|| anyhow!("invalid line number in {value:?}"))?;
    if file.is_empty() {
        bail!("expected FILE:LINE, got {value:?}");
    }
    Ok((PathBuf::from(file), line))
}
