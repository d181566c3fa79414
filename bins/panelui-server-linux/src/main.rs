use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;

use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use panelui_server::{
    http, FileStorage, FrameBuilder, FrameError, PanelContext, PanelServer, ServerConfig,
    Submission,
};

static STARTED: OnceLock<Instant> = OnceLock::new();

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,panelui_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    STARTED.set(Instant::now()).ok();
    tracing::info!("Panel server starting...");

    let ws_addr: SocketAddr = "0.0.0.0:3000".parse()?;
    let http_addr: SocketAddr = "0.0.0.0:3001".parse()?;

    let ctx = PanelContext::new(4096);
    declare_variables(&ctx);

    let config = ServerConfig {
        name: "panelui".to_string(),
        bind_addr: ws_addr,
        ..Default::default()
    };

    let mut server = PanelServer::new(config, ctx.clone());
    server.set_storage(FileStorage::new("panelui-config.json"));
    server.set_main_frame(main_frame);
    server.set_publish(publish_values);

    // UI sections
    server.register("settings", section_settings)?;
    server.register("netw", section_netw)?;
    server.register("time", section_time)?;
    // Submit handlers
    server.register("set_wifi", set_wifi)?;
    server.register("set_wifiap", set_wifiap)?;
    server.register("set_mqtt", set_mqtt)?;
    server.register("set_time", set_time)?;
    server.register("language", set_language)?;

    // HTTP side-channel next to the control channel
    let http_ctx = ctx.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = serve_http(http_addr, http_ctx).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    let ws_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Control channel error: {}", e);
        }
    });

    tracing::info!("🚀 Panel ready!");
    tracing::info!("   Control channel: ws://localhost:3000/ws");
    tracing::info!("   Config:          http://localhost:3001/config");
    tracing::info!("");
    tracing::info!("Try these commands:");
    tracing::info!("   curl http://localhost:3001/version");
    tracing::info!("   websocat ws://localhost:3000/ws");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = ws_handle => {
            tracing::warn!("Control channel stopped");
        }
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Declare every persisted variable with its default. A persisted config, if
/// present, overrides these when storage is attached.
fn declare_variables(ctx: &PanelContext) {
    let id = uuid::Uuid::new_v4().simple().to_string();
    ctx.declare_variable("hostname", &format!("panel-{}", &id[..6]));

    // WiFi client and access point
    ctx.declare_variable("wifi_ssid", "");
    ctx.declare_variable("wifi_pass", "");
    ctx.declare_variable("ap_only", "0");
    ctx.declare_variable("ap_pass", "");

    // MQTT connection
    ctx.declare_variable("mqtt_host", "");
    ctx.declare_variable("mqtt_port", "1883");
    ctx.declare_variable("mqtt_user", "");
    ctx.declare_variable("mqtt_pass", "");
    ctx.declare_variable("mqtt_topic", "panel/");
    ctx.declare_variable("mqtt_period", "30");

    // date/time related vars
    ctx.declare_variable("timezone", "UTC0");
    ctx.declare_variable("ntp_server", "");

    ctx.declare_variable("language", "0");
}

/// Start the HTTP side-channel server.
async fn serve_http(addr: SocketAddr, ctx: PanelContext) -> anyhow::Result<()> {
    let app = http::router(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Full UI description pushed to every new client: menu plus the settings
/// screen.
fn main_frame(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    _data: &Submission,
) -> Result<(), FrameError> {
    let title = ctx.param("hostname").unwrap_or_else(|| "panel".to_string());
    frame.interface_frame(Some(&title));
    block_menu(ctx, frame);
    block_settings(ctx, frame);
    frame.flush()
}

/// Navigation menu. The autosave countdown restarts here, so a full UI
/// rebuild is never interrupted by a config flush.
fn block_menu(ctx: &PanelContext, frame: &mut FrameBuilder) {
    ctx.autosave_reset();
    frame.menu_section();
    frame.option("settings", "Settings");
    frame.section_end();
}

/// The settings screen: language selector, links to the network and time
/// screens, firmware upload.
fn block_settings(_ctx: &PanelContext, frame: &mut FrameBuilder) {
    frame.section("settings", "Settings");

    frame.select("language", "Language");
    frame.option("0", "Rus");
    frame.option("1", "Eng");
    frame.section_end();

    frame.spacer("");
    frame.button("netw", "WiFi & MQTT");
    frame.button("time", "Date & time");

    frame.hidden_section("update", "Firmware update");
    frame.spacer("Upload compiled image");
    frame.file("update", "update", "Upload");
    frame.section_end();

    frame.section_end();
}

/// Network screen: collapsed WiFi client, WiFi AP and MQTT forms.
fn block_netw(_ctx: &PanelContext, frame: &mut FrameBuilder) {
    frame.section("netw", "WiFi & MQTT");

    frame.hidden_section("set_wifi", "WiFi client");
    frame.spacer("WiFi client options");
    frame.text("hostname", "Device hostname");
    frame.text("wifi_ssid", "Network (SSID)");
    frame.password("wifi_pass", "Password");
    frame.button_submit("set_wifi", "Connect", Some("gray"));
    frame.section_end();

    frame.hidden_section("set_wifiap", "WiFi access point");
    frame.text("hostname", "Device hostname");
    frame.spacer("Access point options");
    frame.comment("In AP-only mode the panel stays reachable on its own network.");
    frame.checkbox("ap_only", "AP-only mode");
    frame.password("ap_pass", "Protect AP with a password");
    frame.button_submit("set_wifiap", "Save", Some("gray"));
    frame.section_end();

    frame.hidden_section("set_mqtt", "MQTT");
    frame.text("mqtt_host", "Broker host");
    frame.number("mqtt_port", "Broker port");
    frame.text("mqtt_user", "User");
    frame.text("mqtt_pass", "Password");
    frame.text("mqtt_topic", "Base topic");
    frame.number("mqtt_period", "Publish interval, s");
    frame.button_submit("set_mqtt", "Connect", Some("gray"));
    frame.section_end();

    frame.spacer("");
    frame.button("settings", "Exit");

    frame.section_end();
}

/// Date/time screen.
fn block_time(_ctx: &PanelContext, frame: &mut FrameBuilder) {
    frame.section("set_time", "Date & time");

    frame.comment("Pick the rule matching your region; NTP is optional.");
    frame.select("timezone", "Time zone");
    frame.option("UTC0", "UTC");
    frame.option("CET-1CEST,M3.5.0,M10.5.0/3", "Central Europe");
    frame.option("MSK-3", "Moscow");
    frame.section_end();
    frame.text("ntp_server", "Secondary NTP server");
    frame.button_submit("set_time", "Save", Some("gray"));

    frame.spacer("");
    frame.button("settings", "Exit");

    frame.section_end();
}

fn section_settings(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    _data: &Submission,
) -> Result<(), FrameError> {
    frame.interface_frame(None);
    block_settings(ctx, frame);
    frame.flush()
}

fn section_netw(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    _data: &Submission,
) -> Result<(), FrameError> {
    frame.interface_frame(None);
    block_netw(ctx, frame);
    frame.flush()
}

fn section_time(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    _data: &Submission,
) -> Result<(), FrameError> {
    frame.interface_frame(None);
    block_time(ctx, frame);
    frame.flush()
}

/// WiFi client submit. Credentials are persisted; the actual connection
/// management belongs to the host network stack.
fn set_wifi(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    data: &Submission,
) -> Result<(), FrameError> {
    for key in ["hostname", "wifi_ssid", "wifi_pass"] {
        ctx.save_param(data, key);
    }
    match data.get_str("wifi_ssid") {
        Some(ssid) => tracing::info!(ssid, "WiFi credentials updated"),
        None => tracing::warn!("WiFi: no SSID submitted"),
    }
    back_to_settings(ctx, frame)
}

fn set_wifiap(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    data: &Submission,
) -> Result<(), FrameError> {
    for key in ["hostname", "ap_only", "ap_pass"] {
        ctx.save_param(data, key);
    }
    back_to_settings(ctx, frame)
}

fn set_mqtt(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    data: &Submission,
) -> Result<(), FrameError> {
    for key in [
        "mqtt_host",
        "mqtt_port",
        "mqtt_user",
        "mqtt_pass",
        "mqtt_topic",
        "mqtt_period",
    ] {
        ctx.save_param(data, key);
    }
    back_to_settings(ctx, frame)
}

fn set_time(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    data: &Submission,
) -> Result<(), FrameError> {
    ctx.save_param(data, "timezone");
    ctx.save_param(data, "ntp_server");
    back_to_settings(ctx, frame)
}

fn set_language(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    data: &Submission,
) -> Result<(), FrameError> {
    ctx.save_param(data, "language");
    back_to_settings(ctx, frame)
}

/// Every submit handler lands the user back on the settings screen.
fn back_to_settings(ctx: &PanelContext, frame: &mut FrameBuilder) -> Result<(), FrameError> {
    frame.interface_frame(None);
    block_settings(ctx, frame);
    frame.flush()
}

/// Live values broadcast on the publish cadence.
fn publish_values(
    ctx: &PanelContext,
    frame: &mut FrameBuilder,
    _data: &Submission,
) -> Result<(), FrameError> {
    let uptime = STARTED.get().map(|s| s.elapsed().as_secs()).unwrap_or(0);
    frame.value_frame();
    frame.value(
        "pTime",
        json!(chrono::Local::now().format("%H:%M:%S").to_string()),
        true,
    );
    frame.value("pUptime", json!(uptime), true);
    frame.value("pClients", json!(ctx.hub().count()), true);
    frame.flush()
}
