use std::sync::Arc;

use clap::Parser;
use oci_distribution::auth::{ClientConfig, Credential, CredentialProvider, StaticCredentialProvider};
use oci_distribution::{Reference, Registry};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// `registry/repository[:tag][@digest]`
    image_ref: String,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    plain_http: bool,

    /// Write the first layer's blob content here.
    #[arg(long)]
    outfile: Option<String>,

    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let args = Args::parse();
    let image_ref: Reference = args.image_ref.parse().expect("invalid image reference");

    let credential = match (args.username, args.password) {
        (Some(u), Some(p)) => Credential::user_pass(u, p),
        _ => Credential::default(),
    };
    let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredentialProvider::new(credential));

    let config = ClientConfig {
        plain_http: args.plain_http,
        ..ClientConfig::default()
    };

    let registry = Registry::new(image_ref.resolve_registry(), credentials, config).expect("failed to build registry client");
    let repository = registry.repository(image_ref.repository());

    let manifest_reference = if image_ref.digest().is_ok() {
        image_ref.clone()
    } else {
        let descriptor = repository.manifests.resolve(&image_ref).await.expect("failed to resolve reference");
        image_ref.with_digest(descriptor.digest).expect("resolved digest is valid")
    };

    let (descriptor, bytes) = repository.manifests.fetch(&manifest_reference).await.expect("failed to fetch manifest");
    println!("resolved {} -> {} ({} bytes)", image_ref, descriptor.digest, descriptor.size);

    if args.json {
        jq(&bytes);
    } else if oci_distribution::mediatype::is_index(&descriptor.media_type) {
        let index: oci_distribution::Index = serde_json::from_slice(&bytes).expect("index is valid json");
        println!("{index:#?}");
    } else {
        let manifest: oci_distribution::Manifest = serde_json::from_slice(&bytes).expect("manifest is valid json");
        println!("{manifest:#?}");

        if let Some(outfile) = args.outfile {
            let layer = manifest.layers.first().expect("manifest has at least one layer");
            let mut writer = BufWriter::new(File::create(&outfile).await.expect("failed to create outfile"));
            let written = repository
                .blobs
                .fetch_to_writer(layer, &mut writer)
                .await
                .expect("failed to fetch layer blob");
            writer.flush().await.expect("failed to flush outfile");
            println!("wrote {written} bytes to {outfile}");
        }
    }
}

fn jq(buf: impl AsRef<[u8]>) {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new("jq").stdin(Stdio::piped()).spawn().expect("jq not found on PATH");
    child.stdin.take().unwrap().write_all(buf.as_ref()).unwrap();
    child.wait().unwrap();
}
