//! Shop Manager - Tauri v2 Backend
//!
//! This module registers all IPC command handlers that the React frontend
//! calls via `@tauri-apps/api/core::invoke()`. Command names use snake_case
//! derived from the screen actions (e.g. "add supplier" -> `supplier_create`).

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// App start time for uptime calculation (epoch seconds).
pub(crate) static APP_START_EPOCH: AtomicU64 = AtomicU64::new(0);

mod api;
mod attachments;
mod auth;
mod backup;
mod commands;
mod db;
mod diagnostics;
mod export;
mod ledger;
mod merge;
mod records;
mod storage;
mod store;
mod sync;

// ============================================================================
// App entry point
// ============================================================================

pub fn run() {
    // Record start time for uptime tracking
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    APP_START_EPOCH.store(epoch, Ordering::Relaxed);

    // Initialize structured logging (console + rolling file)
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shop_manager_lib=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs();

    // Rolling file appender: creates daily log files in the logs directory
    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "shop");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app; dropping it flushes
    // logs. We leak it intentionally since the app runs until process exit.
    std::mem::forget(_guard);

    info!("Starting Shop Manager v{}", env!("CARGO_PKG_VERSION"));

    tauri::Builder::default()
        .setup(|app| {
            use std::sync::Arc;
            use tauri::Manager;

            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("Failed to get app data dir");

            // Main DB connection for Tauri commands
            let db_state = Arc::new(db::init(&app_data_dir).expect("Failed to initialize database"));
            app.manage(db_state);

            // Auth state
            app.manage(auth::AuthState::new());

            // Remote record store, shared between commands and the sync loop
            let remote_store = Arc::new(store::RemoteStore::new());
            app.manage(remote_store.clone());

            // Sync state (shared between commands and background loop)
            let sync_state = Arc::new(sync::SyncState::new());
            app.manage(sync_state.clone());

            // Second DB connection for the background sync loop
            let db_for_sync =
                Arc::new(db::init(&app_data_dir).expect("Failed to init sync database"));

            // Start background sync loop (30s interval)
            sync::start_sync_loop(
                app.handle().clone(),
                db_for_sync,
                remote_store,
                sync_state,
                30,
            );

            info!("Database, auth, and sync loop registered");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // App lifecycle
            commands::runtime::app_get_version,
            commands::runtime::system_get_info,
            // Auth
            commands::auth::auth_login,
            commands::auth::auth_logout,
            commands::auth::auth_get_current_session,
            commands::auth::auth_validate_session,
            commands::auth::auth_has_permission,
            commands::auth::auth_get_session_stats,
            commands::auth::auth_is_configured,
            commands::auth::auth_setup_pin,
            commands::auth::auth_track_activity,
            // Settings
            commands::settings::get_settings,
            commands::settings::settings_is_configured,
            commands::settings::settings_get,
            commands::settings::settings_set,
            commands::settings::settings_update_server_credentials,
            commands::settings::settings_test_connection,
            commands::settings::settings_factory_reset,
            // Suppliers
            commands::records::supplier_get_all,
            commands::records::supplier_get_by_id,
            commands::records::supplier_create,
            commands::records::supplier_update,
            commands::records::supplier_delete,
            // Customers
            commands::records::customer_get_all,
            commands::records::customer_get_by_id,
            commands::records::customer_create,
            commands::records::customer_update,
            commands::records::customer_delete,
            // Transactions
            commands::records::transaction_get_all,
            commands::records::transaction_get_by_id,
            commands::records::transaction_create,
            commands::records::transaction_update,
            commands::records::transaction_delete,
            // Udhar
            commands::records::udhar_get_all,
            commands::records::udhar_get_by_id,
            commands::records::udhar_create,
            commands::records::udhar_update,
            commands::records::udhar_delete,
            // Income
            commands::records::income_get_all,
            commands::records::income_get_by_id,
            commands::records::income_create,
            commands::records::income_update,
            commands::records::income_delete,
            // Dashboard
            commands::records::dashboard_get_totals,
            // Sync
            commands::sync::sync_get_status,
            commands::sync::sync_get_network_status,
            commands::sync::sync_force,
            commands::sync::sync_full,
            // Backup
            commands::backup::backup_export,
            commands::backup::backup_save_to_file,
            commands::backup::backup_upload_cloud,
            commands::backup::backup_list_cloud,
            commands::backup::backup_restore,
            commands::backup::backup_restore_from_cloud,
            commands::backup::backup_restore_from_file,
            // Attachments
            commands::attachments::attachment_save,
            commands::attachments::attachment_list,
            commands::attachments::attachment_read,
            commands::attachments::attachment_delete,
            commands::attachments::attachment_cleanup_orphans,
            // Exports
            commands::export::export_csv_text,
            commands::export::export_csv_file,
            commands::export::export_xlsx_file,
            // Diagnostics
            commands::diagnostics::diagnostics_get_about,
            commands::diagnostics::diagnostics_get_system_health,
            commands::diagnostics::diagnostics_export,
            commands::diagnostics::diagnostics_open_export_dir,
        ])
        .run(tauri::generate_context!())
        .expect("error while running Shop Manager");
}
