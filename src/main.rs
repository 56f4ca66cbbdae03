use miette::Result;

use terrane::Terrane;

#[async_std::main]
async fn main() -> Result<()> {
    Terrane::load().await
}
