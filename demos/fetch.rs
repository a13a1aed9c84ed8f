use fez::{Client, Method, Request};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "fez=debug".to_owned()))
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "http://example.org/".to_owned());
    let body = args.next();

    let client = Client::new()?;
    let req = match body {
        Some(body) => Request::new(Method::POST, url)
            .header("content-type", "application/json")
            .body(body),
        None => Request::get(url),
    };

    let resp = smol::block_on(client.schedule(req)?)?;

    println!("{} {}", resp.status().as_u16(), resp.reason());
    for (name, value) in resp.headers().iter() {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{}", resp.text());

    client.close();
    Ok(())
}
