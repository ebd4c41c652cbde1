use std::{fs, path::PathBuf, time::Duration};

use clap::Parser;
use log::{error, info};

use acme_http01::{
    account::AccountBuilder,
    certificate::Certificate,
    challenge::DirPublisher,
    error::Result,
    order::{self, PollConfig, FULLCHAIN_FILE},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "ACME http-01 certificate issuance client")]
struct Args {
    /// Domain to issue a certificate for
    #[arg(short, long)]
    domain: String,

    /// Contact email for account registration
    #[arg(short, long)]
    email: String,

    /// Directory served at http://<domain>/.well-known/acme-challenge/
    #[arg(long, default_value = "acme-challenge")]
    challenge_dir: PathBuf,

    /// Output directory for keys and certificates
    #[arg(short, long, default_value = "certs")]
    out_dir: PathBuf,

    /// Use the Let's Encrypt staging environment
    #[arg(long)]
    staging: bool,

    /// Custom ACME directory URL (overrides --staging)
    #[arg(long)]
    directory_url: Option<String>,

    /// Seconds between polling attempts
    #[arg(long, default_value_t = 2)]
    poll_interval: u64,

    /// Total seconds to wait in each polling loop
    #[arg(long, default_value_t = 120)]
    poll_timeout: u64,

    /// Skip issuance while the existing certificate is still valid for
    /// more than this many days (0 forces renewal)
    #[arg(long, default_value_t = 30)]
    renew_within: u32,
}

fn run(args: &Args) -> Result<()> {
    if let Ok(pem) = fs::read_to_string(args.out_dir.join(FULLCHAIN_FILE)) {
        let cert = Certificate::from_pem_chain(&pem)?;
        if !cert.should_renew(args.renew_within)? {
            info!(
                "certificate for {} valid until {}, nothing to do",
                args.domain,
                cert.not_after()?
            );
            return Ok(());
        }
        info!("certificate for {} is due for renewal", args.domain);
    }

    let mut builder =
        AccountBuilder::new(&args.email, &args.out_dir).staging(args.staging);
    if let Some(url) = &args.directory_url {
        builder = builder.directory_url(url);
    }
    let mut account = builder.build()?;

    let publisher = DirPublisher::new(&args.challenge_dir);
    let poll = PollConfig {
        interval: Duration::from_secs(args.poll_interval),
        timeout: Duration::from_secs(args.poll_timeout),
    };

    let issued = order::issue(&mut account, &args.domain, &publisher, &poll)?;
    info!(
        "issued certificate for {}: fullchain at {}, key at {}",
        issued.domain,
        issued.fullchain_path.display(),
        issued.privkey_path.display()
    );
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("issuance failed: {e}");
        std::process::exit(1);
    }
}
