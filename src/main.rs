use clap::Parser;
use ldapmux::client::{SearchRequest, SearchResponse};
use ldapmux::config::{CliArgs, Command, ConnectionArgs, SearchArgs};
use ldapmux::{LdapConnection, Server, ServerConfig};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Configure logging
    FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .init();

    match args.command {
        Command::Bind(connection) => bind(connection).await,
        Command::Search(search_args) => search(search_args).await,
        Command::Serve(serve) => {
            let server = Server::new(ServerConfig::from_serve_args(serve)?).await?;
            server.run().await?;
            Ok(())
        }
    }
}

async fn open(args: &ConnectionArgs) -> anyhow::Result<LdapConnection> {
    let config = args.resolve()?;
    let address = format!("{}:{}", config.host, config.port);
    let connection = LdapConnection::new(config);
    if !connection.connect().await? {
        anyhow::bail!("Could not connect to {}", address);
    }
    Ok(connection)
}

async fn bind(args: ConnectionArgs) -> anyhow::Result<()> {
    let connection = open(&args).await?;
    let outcome = connection.bind_default().await?;
    println!("{:?}: {}", outcome.result_code, outcome.diagnostic_message);
    for url in &outcome.referrals {
        println!("referral: {}", url);
    }
    connection.unbind().await?;
    Ok(())
}

async fn search(args: SearchArgs) -> anyhow::Result<()> {
    let connection = open(&args.connection).await?;
    connection.bind_default().await?.success()?;

    let request = SearchRequest::new(&args.base, &args.filter, args.scope.parse()?)
        .with_attributes(args.attributes.iter().cloned());
    let results = connection.search_request(request).await?;
    let done = results.done().clone();

    for response in results {
        match response {
            SearchResponse::Entry(entry) => {
                println!("dn: {}", entry.dn);
                let mut names: Vec<_> = entry.attributes.keys().collect();
                names.sort();
                for name in names {
                    for value in entry.values(name) {
                        println!("{}: {}", name, value);
                    }
                }
                println!();
            }
            SearchResponse::Reference(reference) => {
                for url in reference.urls {
                    println!("ref: {}", url);
                }
            }
            SearchResponse::Intermediate(_) => {}
        }
    }

    println!("result: {:?} {}", done.result_code, done.diagnostic_message);
    for url in &done.referrals {
        println!("referral: {}", url);
    }
    connection.unbind().await?;
    Ok(())
}
