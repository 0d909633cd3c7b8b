use claims_backend::claims::categories::category_file;
use claims_backend::claims::format;
use claims_backend::{ClaimStore, StoreConfig};
use dotenv::dotenv;
use std::collections::BTreeMap;
use std::process::ExitCode;

const USAGE: &str = "usage: claims-backend [summary | list | show <id> | next-id | rewrite]";

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let config = StoreConfig::from_env();
    log::info!("claims-backend v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Knowledge base: {:?}", config.knowledge_base_dir);

    let store = ClaimStore::new(config);
    let outcome = store.load_claims().await;
    log::info!("Initial load: {:?} ({} claims)", outcome.status, outcome.claims.len());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("summary");

    let code = match command {
        "summary" => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for claim in store.get_all_claims() {
                *counts.entry(claim.category.clone()).or_default() += 1;
            }
            println!("{} claims ({:?} storage)", store.len(), store.layout());
            for (category, count) in counts {
                println!("  {:<32} {:>5}  -> {}", category, count, category_file(&category));
            }
            ExitCode::SUCCESS
        }
        "list" => {
            for claim in store.get_all_claims() {
                println!("{}\t{}\t{}", claim.id, claim.category, claim.text);
            }
            ExitCode::SUCCESS
        }
        "show" => match args.get(1).and_then(|id| store.get_claim(id)) {
            Some(claim) => {
                print!("{}", format::serialize_claim(&claim));
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("claim not found: {}", args.get(1).map(String::as_str).unwrap_or(""));
                ExitCode::FAILURE
            }
        },
        "next-id" => {
            println!("{}", store.generate_id());
            ExitCode::SUCCESS
        }
        "rewrite" => match store.persist().wait().await {
            Some(report) if report.is_success() => {
                println!("rewrote {} files", report.outcomes.len());
                ExitCode::SUCCESS
            }
            Some(report) => {
                for failed in report.failed() {
                    eprintln!(
                        "failed: {} ({})",
                        failed.path.display(),
                        failed.error.as_deref().unwrap_or("unknown error")
                    );
                }
                ExitCode::FAILURE
            }
            None => {
                eprintln!("persist cycle did not run");
                ExitCode::FAILURE
            }
        },
        other => {
            eprintln!("unknown command: {}\n{}", other, USAGE);
            ExitCode::FAILURE
        }
    };

    store.shutdown().await;
    code
}
