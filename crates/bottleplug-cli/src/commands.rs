//! Command handlers.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use bottleplug_core::api::{ApiError, ApiResponse, FormPart};
use bottleplug_core::models::notification::unread_count;
use bottleplug_core::models::AddCartItem;
use bottleplug_core::realtime::{ConnectionState, NotificationSocket, RealtimeEvent, ReconnectPolicy};
use bottleplug_core::utils::{format_date, format_remaining, format_ugx, truncate_string};
use bottleplug_core::watchdog::CheckOutcome;
use bottleplug_core::{ApiClient, ApiRequest, AuthManager, ClientConfig, SessionWatchdog};

use crate::{CartAction, Command};

/// Column width for product and notification titles
const TITLE_WIDTH: usize = 40;

/// Log the technical detail and hand the user-facing text up to `main`
fn report(error: ApiError) -> anyhow::Error {
    warn!(error = %error.technical_message(), "Request failed");
    match error {
        ApiError::Validation(message) => anyhow::anyhow!(message),
        ApiError::Http { .. } | ApiError::Network(_) | ApiError::Timeout | ApiError::SessionExpired => {
            anyhow::anyhow!(error.user_message())
        }
        other => other.into(),
    }
}

pub async fn run(command: Command, auth: &AuthManager, config: &ClientConfig) -> Result<()> {
    let api = auth.api();
    match command {
        Command::Login { email } => login(auth, email).await,
        Command::Logout => {
            auth.sign_out().await.map_err(report)?;
            println!("Signed out.");
            Ok(())
        }
        Command::Status => status(auth),
        Command::Restore => restore(auth).await,
        Command::Ping => {
            if api.test_connection().await {
                println!("Backend reachable at {}", api.base_url());
                Ok(())
            } else {
                anyhow::bail!("Backend unreachable at {}", api.base_url())
            }
        }
        Command::Get { path, query, public } => {
            let mut request = ApiRequest::get(path);
            for (key, value) in query {
                request = request.query(key, value);
            }
            if public {
                request = request.public();
            }
            print_response(&api.execute(&request).await.map_err(report)?)
        }
        Command::Post { path, data } => {
            let body: Value = match data {
                Some(raw) => serde_json::from_str(&raw).context("--data is not valid JSON")?,
                None => Value::Object(Default::default()),
            };
            let response = api
                .execute(&ApiRequest::post(path).json(body))
                .await
                .map_err(report)?;
            print_response(&response)
        }
        Command::Upload { path, fields, files } => upload(api, path, fields, files).await,
        Command::Products { search, page } => products(api, search, page).await,
        Command::Orders { mine } => orders(api, mine).await,
        Command::Balance => balance(api).await,
        Command::Cart { action } => cart(api, action.unwrap_or(CartAction::Show)).await,
        Command::Notifications { mark_read } => notifications(api, mark_read).await,
        Command::Watch { interval } => watch(api, config, Duration::from_secs(interval.max(1))).await,
    }
}

fn print_response(response: &ApiResponse) -> Result<()> {
    match response.text() {
        Some(text) => println!("{}", text),
        None => println!("{}", serde_json::to_string_pretty(&response.body)?),
    }
    Ok(())
}

async fn login(auth: &AuthManager, email: Option<String>) -> Result<()> {
    let user = match email {
        Some(email) => {
            let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
            auth.sign_in_with_password(&email, &password)
                .await
                .map_err(report)?
        }
        None => match auth.sign_in_with_identity().await {
            Err(ApiError::NotAuthenticated) => {
                anyhow::bail!("No identity token. Pass --id-token or use --email.")
            }
            other => other.map_err(report)?,
        },
    };

    println!("Signed in as {}", user.display_name());
    if user.is_admin() {
        println!("Dashboard access: yes");
    }
    debug!(destination = %auth.redirect_after_auth(), "Post sign-in destination");
    Ok(())
}

fn status(auth: &AuthManager) -> Result<()> {
    let sessions = auth.sessions();
    match sessions.load()? {
        Some(session) => {
            println!("User:       {}", session.email.as_deref().unwrap_or(&session.uid));
            println!("Mode:       {}", if session.backend_only { "backend" } else { "identity" });
            println!("Started:    {}", session.started_at.format("%Y-%m-%d %H:%M UTC"));
            println!("Remaining:  {}", format_remaining(sessions.remaining()));
        }
        None => println!("Not signed in."),
    }

    let stored = |present: bool| if present { "stored" } else { "none" };
    println!("Access:     {}", stored(sessions.access_token()?.is_some()));
    println!("Refresh:    {}", stored(sessions.refresh_token()?.is_some()));
    Ok(())
}

async fn restore(auth: &AuthManager) -> Result<()> {
    match auth.restore_session().await {
        Ok(Some(user)) => {
            println!("Session restored for {}", user.display_name());
            Ok(())
        }
        Ok(None) => {
            println!("No valid session. Sign in with `bottleplug login`.");
            Ok(())
        }
        Err(e @ (ApiError::Network(_) | ApiError::Timeout)) => {
            info!("Backend unreachable, stored credentials kept");
            Err(report(e))
        }
        Err(e) => Err(report(e)),
    }
}

/// Content type from the file extension; unknown files go as octet-stream
fn mime_for(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

async fn upload(
    api: &ApiClient,
    path: String,
    fields: Vec<(String, String)>,
    files: Vec<(String, String)>,
) -> Result<()> {
    let mut parts: Vec<FormPart> = fields
        .into_iter()
        .map(|(name, value)| FormPart::text(name, value))
        .collect();

    for (name, file) in files {
        let file_path = Path::new(&file);
        let bytes = std::fs::read(file_path)
            .with_context(|| format!("Failed to read {}", file_path.display()))?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.clone());
        parts.push(FormPart::file(name, file_name, bytes).with_mime(mime_for(file_path)));
    }

    let response = api
        .execute(&ApiRequest::post(path).multipart(parts))
        .await
        .map_err(report)?;
    print_response(&response)
}

async fn products(api: &ApiClient, search: Option<String>, page: u32) -> Result<()> {
    let (items, more) = match search {
        Some(query) => (api.search_products(&query).await.map_err(report)?, false),
        None => {
            let page = page.max(1).to_string();
            let listing = api
                .fetch_products(&[("page", page.as_str())])
                .await
                .map_err(report)?;
            let more = listing.has_next();
            (listing.results, more)
        }
    };

    if items.is_empty() {
        println!("No products.");
        return Ok(());
    }
    for product in &items {
        let price = product.price.map(format_ugx).unwrap_or_else(|| "-".to_string());
        let stock = if product.in_stock() {
            format!("{} in stock", product.stock)
        } else {
            "out of stock".to_string()
        };
        let discount = product
            .discount_percent()
            .map(|d| format!("  -{}%", d))
            .unwrap_or_default();
        println!(
            "{:<w$} {:>14}  {}{}",
            truncate_string(&product.name, TITLE_WIDTH),
            price,
            stock,
            discount,
            w = TITLE_WIDTH
        );
    }
    if more {
        println!("(more pages available, use --page)");
    }
    Ok(())
}

async fn orders(api: &ApiClient, mine: bool) -> Result<()> {
    let orders = if mine {
        api.fetch_my_orders().await
    } else {
        api.fetch_orders(&[]).await
    }
    .map_err(report)?;

    if orders.is_empty() {
        println!("No orders.");
    }
    for order in &orders {
        println!(
            "{:<16} {:<12} {:>14}  {}",
            order.order_number.as_deref().unwrap_or("-"),
            order.status.as_deref().unwrap_or("-"),
            order.total_amount.map(format_ugx).unwrap_or_else(|| "-".to_string()),
            order.created_at.as_deref().map(format_date).unwrap_or_default()
        );
    }
    Ok(())
}

async fn balance(api: &ApiClient) -> Result<()> {
    let orders = api.fetch_my_orders().await.map_err(report)?;
    if orders.is_empty() {
        println!("No orders.");
        return Ok(());
    }

    let balances = join_all(orders.iter().map(|order| api.order_balance(order))).await;

    let mut outstanding = 0.0;
    for (order, balance) in orders.iter().zip(&balances) {
        outstanding += balance.outstanding_balance;
        println!(
            "{:<16} paid {:>14}  owed {:>14}  {}",
            order.order_number.as_deref().unwrap_or("-"),
            format_ugx(balance.paid_amount),
            format_ugx(balance.outstanding_balance),
            balance.status()
        );
    }
    println!("Total outstanding: {}", format_ugx(outstanding));
    Ok(())
}

async fn cart(api: &ApiClient, action: CartAction) -> Result<()> {
    match action {
        CartAction::Show => {}
        CartAction::Add { product, quantity } => {
            api.add_to_cart(&AddCartItem::new(product, quantity.max(1)))
                .await
                .map_err(report)?;
        }
        CartAction::Update { item_id, quantity } => {
            api.update_cart_item(&item_id, quantity)
                .await
                .map_err(report)?;
        }
        CartAction::Remove { item_id } => {
            api.remove_cart_item(&item_id).await.map_err(report)?;
        }
        CartAction::Clear => {
            api.clear_cart().await.map_err(report)?;
        }
    }

    let cart = api.fetch_cart().await.map_err(report)?;
    if cart.is_empty() {
        println!("Cart is empty.");
        return Ok(());
    }
    for item in &cart.items {
        println!(
            "{:<8} {:<w$} x{:<4} {:>14}",
            item.id.as_deref().unwrap_or("-"),
            truncate_string(item.product_name.as_deref().unwrap_or("-"), TITLE_WIDTH),
            item.quantity,
            format_ugx(item.item_total()),
            w = TITLE_WIDTH
        );
    }
    let total = cart.total_amount.unwrap_or_else(|| cart.computed_total());
    println!("{} items, total {}", cart.total_quantity(), format_ugx(total));
    Ok(())
}

async fn notifications(api: &ApiClient, mark_read: bool) -> Result<()> {
    let notifications = api.fetch_notifications().await.map_err(report)?;
    for notification in &notifications {
        println!(
            "{} {:<w$} {}",
            if notification.is_read { " " } else { "*" },
            truncate_string(&notification.title, TITLE_WIDTH),
            notification.created_at.as_deref().map(format_date).unwrap_or_default(),
            w = TITLE_WIDTH
        );
    }
    println!("{} unread", unread_count(&notifications));

    if mark_read && !notifications.is_empty() {
        api.mark_all_notifications_read().await.map_err(report)?;
        println!("Marked all as read.");
    }
    Ok(())
}

async fn watch(api: &ApiClient, config: &ClientConfig, interval: Duration) -> Result<()> {
    if !api.sessions().is_session_valid() {
        anyhow::bail!("Not signed in. Sign in with `bottleplug login` first.");
    }

    let (socket, mut events) =
        NotificationSocket::spawn(config.notifications_url(), api.clone(), ReconnectPolicy::default());
    let watchdog = SessionWatchdog::spawn(api.clone(), interval);
    let mut states = socket.subscribe();
    let mut checks = watchdog.subscribe();

    println!("Watching notifications, Ctrl-C to stop.");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Some(RealtimeEvent::Notification(n)) => {
                    println!("[new] {}: {}", n.title, n.message);
                }
                Some(RealtimeEvent::NotificationUpdate(n)) => {
                    println!("[updated] {} (read: {})", n.title, n.is_read);
                }
                None => {
                    info!("Notification stream closed");
                    break;
                }
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Connected => println!("Connected."),
                    ConnectionState::BackingOff { attempt, delay } => {
                        eprintln!("Disconnected, retry {} in {}s", attempt, delay.as_secs());
                    }
                    ConnectionState::GaveUp => {
                        eprintln!("Could not reach the notification service.");
                        break;
                    }
                    other => debug!(state = ?other, "Socket state changed"),
                }
            }
            changed = checks.changed() => {
                if changed.is_err() {
                    break;
                }
                if *checks.borrow_and_update() == CheckOutcome::Expired {
                    break;
                }
            }
        }
    }

    socket.shutdown().await;
    watchdog.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a/b/Logo.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("promo.mp4")), "video/mp4");
        assert_eq!(mime_for(Path::new("stock.csv")), "text/csv");
        assert_eq!(mime_for(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_report_uses_user_message() {
        let err = report(ApiError::SessionExpired);
        assert_eq!(err.to_string(), ApiError::SessionExpired.user_message());

        let err = report(ApiError::validation("order_id is required"));
        assert_eq!(err.to_string(), "order_id is required");
    }
}
