use cloudapi_http::{
    add_query_params, handle_data_source_not_found_error, predicates, RequestDescription,
    Transport,
};
use reqwest::header::{self, HeaderMap, HeaderValue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let key_ring = std::env::var("KMS_KEY_RING")?;
    let token = std::env::var("CLOUDAPI_ACCESS_TOKEN")?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}"))?,
    );
    let transport = Transport::from_env().map_err(anyhow::Error::msg)?;

    let base = format!("https://cloudkms.googleapis.com/v1/{key_ring}/cryptoKeys");
    let mut page_token = None::<String>;
    loop {
        let url = match &page_token {
            Some(token) => add_query_params(&base, [("pageToken", token.as_str())])?,
            None => base.clone(),
        };
        let request = RequestDescription::get(url.clone())
            .with_headers(headers.clone())
            .retry_with_backoff_on(predicates::api_error_with_code(429));

        let page = transport
            .send_request(&request)
            .await
            .map_err(|err| handle_data_source_not_found_error(err, "CryptoKeys", &url))?
            .into_json()
            .unwrap_or_default();

        for key in page.get("cryptoKeys").and_then(|v| v.as_array()).into_iter().flatten() {
            println!("{}", key["name"]);
        }

        page_token = page
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
        if page_token.is_none() {
            break;
        }
    }

    Ok(())
}
