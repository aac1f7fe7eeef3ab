use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use factura_core::invoice::sign::{InvoiceSigner, verify};
use factura_core::invoice::{QrCodeGenerator, QrPayload, verification_url};
use factura_core::sepa::{DirectDebitRequest, split_installments};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factura")]
#[command(about = "E-invoice signing, QR and SEPA direct-debit tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a payload file and print the base64 DER signature.
    Sign {
        #[arg(long)]
        private_key: PathBuf,
        #[arg(long)]
        payload: PathBuf,
    },
    /// Check a signature; exits non-zero when it does not verify.
    Verify {
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        payload: PathBuf,
        #[arg(long)]
        signature: String,
    },
    /// Print the SPKI PEM public key of a private key.
    PublicKey {
        #[arg(long)]
        private_key: PathBuf,
    },
    /// Render an invoice QR code.
    Qr {
        #[arg(long)]
        invoice_number: String,
        #[arg(long)]
        aeat_id: String,
        #[arg(long)]
        total: Decimal,
        #[arg(long)]
        issue_date: NaiveDate,
        #[arg(long)]
        base_url: String,
        #[arg(long, default_value_t = 300)]
        width: u32,
        /// Write a PNG file instead of printing a data URL.
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Write pain.008 files for a direct-debit request.
    Sepa {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Print the installment plan as JSON.
    Installments {
        #[arg(long)]
        total: Decimal,
        #[arg(long)]
        count: u32,
        #[arg(long)]
        first_due: NaiveDate,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sign {
            private_key,
            payload,
        } => {
            let signer = load_signer(&private_key)?;
            let payload = read_bytes(&payload)?;
            let signature = signer.sign(&payload)?;
            println!("{}", signature.signature());
        }
        Commands::Verify {
            public_key,
            payload,
            signature,
        } => {
            let public_key = read_text(&public_key)?;
            let payload = read_bytes(&payload)?;
            if !verify(&payload, &signature, &public_key) {
                bail!("signature does not verify");
            }
            println!("valid");
        }
        Commands::PublicKey { private_key } => {
            let signer = load_signer(&private_key)?;
            print!("{}", signer.public_key_pem()?);
        }
        Commands::Qr {
            invoice_number,
            aeat_id,
            total,
            issue_date,
            base_url,
            width,
            png,
        } => {
            let url = verification_url(&base_url, &invoice_number);
            let payload = QrPayload::new(invoice_number, aeat_id, total, issue_date, url);
            let generator = QrCodeGenerator::with_width(width)?;
            match png {
                Some(path) => {
                    let bytes = generator.render_png(&payload)?;
                    std::fs::write(&path, bytes)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("{}", path.display());
                }
                None => println!("{}", generator.generate(&payload)?),
            }
        }
        Commands::Sepa { request, out_dir } => {
            let request: DirectDebitRequest = serde_json::from_str(&read_text(&request)?)
                .context("parsing direct-debit request")?;
            let files = request.generate(Utc::now().naive_utc())?;
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("creating {}", out_dir.display()))?;
            for file in files {
                let path = out_dir.join(&file.file_name);
                std::fs::write(&path, &file.xml)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("{}", path.display());
            }
        }
        Commands::Installments {
            total,
            count,
            first_due,
        } => {
            let plan = split_installments(total, count, first_due)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}

/// PKCS#8 private key, PEM or DER.
fn load_signer(path: &Path) -> Result<InvoiceSigner> {
    let raw = read_bytes(path)?;
    let signer = match std::str::from_utf8(&raw) {
        Ok(text) if text.trim_start().starts_with("-----BEGIN") => InvoiceSigner::from_pem(text),
        _ => InvoiceSigner::from_der(&raw),
    };
    signer.with_context(|| format!("loading private key {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}
