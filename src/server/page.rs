use std::net::IpAddr;

/// Landing page: the live feed plus the address to reach it from the LAN.
pub fn render_index(ip: IpAddr, port: u16) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>detstream</title>
<style>
body {{ margin: 0; background: #111; color: #eee; font-family: sans-serif; text-align: center; }}
img {{ max-width: 100%; height: auto; margin-top: 1em; }}
code {{ color: #7f7; }}
</style>
</head>
<body>
<h1>Live detection</h1>
<p>Open <code id="lan-ip">{ip}</code> on port <code>{port}</code> from another device: <a href="/video_feed">http://{ip}:{port}/video_feed</a></p>
<img src="/video_feed" alt="live stream">
</body>
</html>
"#
    )
}
