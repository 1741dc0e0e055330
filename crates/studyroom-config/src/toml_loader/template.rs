//! Commented default config written on first run.

pub(crate) fn default_config_toml() -> String {
    r##"# Study room configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[relay]
# project_ref = ""           # Supabase project reference (or SUPABASE_PROJECT_REF)
# api_key = ""               # anon key (or SUPABASE_ANON_KEY)
# heartbeat_interval = 25    # 10-300 seconds
# reconnect_delay = 1        # 1-60 seconds
# max_reconnect_delay = 30   # 1-600 seconds
# connect_timeout = 15       # 1-120 seconds

[ice]
# servers = ["stun:stun.l.google.com:19302"]

[media]
# audio = true
# video = true
# start_muted = false
# start_camera_off = false

[negotiation]
# initiator = "lower_id"     # lower_id, observer
# timeout_secs = 15          # 1-300
# max_attempts = 3           # 1-10
# sweep_interval_ms = 1000   # 100-10000
# candidate_ttl_secs = 10    # 1-300
# candidate_buffer_max = 32  # 1-1024

[chat]
# max_messages = 500         # 1-10000
# max_length = 2000          # 1-10000

[membership]
# enabled = true
# increment_rpc = "increment_participants"
# decrement_rpc = "decrement_participants"

[logging]
# level = "studyroom=info"
"##
    .to_string()
}
