use std::fmt::Write;

use super::AppState;

const STYLE: &str = r"
    body { font-family: Arial, sans-serif; max-width: 640px; margin: 2rem auto; }
    h1 { margin-bottom: .2rem }
    .card { padding: 1rem; margin-top: 1rem; border: 1px solid #ddd; border-radius: 12px; box-shadow: 0 2px 8px rgba(0,0,0,.06); }
    label { display: block; margin: .6rem 0 .2rem; font-weight: 600 }
    select, input, button { padding: .4rem; font-size: 1rem; }
    .row { display: flex; gap: .5rem; align-items: center }
    .row > * { flex: 1 }
    .muted { color: #666; font-size: .95rem }
    .warning { color: #b00 }
    .disabled { color: #999 }
    table { width: 100%; border-collapse: collapse }
    td { padding: .3rem 0 }
    form.inline { display: inline }
";

const CLOCK_SCRIPT: &str = r"
    function tick() {
      const now = new Date();
      const hh = String((now.getHours() % 12) || 12).padStart(2, '0');
      const mm = String(now.getMinutes()).padStart(2, '0');
      const ampm = now.getHours() >= 12 ? 'PM' : 'AM';
      document.getElementById('now').textContent = hh + ':' + mm + ' ' + ampm;
    }
    setInterval(tick, 1000); window.onload = tick;
";

pub(super) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset=\"utf-8\" />\n  <title>{title}</title>\n  <style>{STYLE}</style>\n  <script>{CLOCK_SCRIPT}</script>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = escape(title),
    )
}

/// a short page with a link back home
pub(super) fn message(title: &str, text: &str) -> String {
    layout(
        title,
        &format!(
            "<h2>{}</h2>\n<p>{}</p>\n<p><a href=\"/\">Back</a></p>",
            escape(title),
            escape(text)
        ),
    )
}

fn options(values: impl IntoIterator<Item = (String, String)>) -> String {
    values
        .into_iter()
        .fold(String::new(), |mut out, (value, label)| {
            let _ = writeln!(
                out,
                "<option value=\"{}\">{}</option>",
                escape(&value),
                escape(&label)
            );
            out
        })
}

pub(super) fn render(state: &AppState) -> String {
    let alarms = state.store.list();
    let ringing = state.notifier.ringing();
    let sounds = state.sounds.list();

    let mut body = String::new();
    body.push_str("<h1>Alarm Clock</h1>\n");
    body.push_str("<p class=\"muted\">Current time: <strong id=\"now\">--:-- --</strong></p>\n");

    body.push_str("<div class=\"card\">\n<h3>Alarms</h3>\n");
    if alarms.is_empty() {
        body.push_str("<p class=\"muted\">No alarms yet.</p>\n");
    } else {
        body.push_str("<table>\n");
        for alarm in &alarms {
            let class = if alarm.enabled { "" } else { " class=\"disabled\"" };
            let label = alarm.label.as_deref().map(escape).unwrap_or_default();
            let sound = alarm
                .sound
                .as_deref()
                .unwrap_or_else(|| state.sounds.default_sound());
            let bell = if ringing.contains(&alarm.id) { " 🔔" } else { "" };
            let _ = writeln!(
                body,
                "<tr{class}><td><b>{time}</b>{bell}</td><td>{label}</td><td class=\"muted\">{sound}</td>\
                 <td><form class=\"inline\" method=\"post\" action=\"/alarms/{id}/toggle\"><button>{toggle}</button></form> \
                 <form class=\"inline\" method=\"post\" action=\"/alarms/{id}/delete\"><button>Delete</button></form></td></tr>",
                time = escape(&state.config.format_time(alarm.time())),
                sound = escape(sound),
                id = alarm.id,
                toggle = if alarm.enabled { "Disable" } else { "Enable" },
            );
        }
        body.push_str("</table>\n");
    }
    body.push_str("</div>\n");

    let hours = options((1..=12).map(|h| (h.to_string(), format!("{h:02}"))));
    let minutes = options((0..60).map(|m| (m.to_string(), format!("{m:02}"))));
    let ampm = options(["AM", "PM"].map(|s| (s.to_string(), s.to_string())));
    let ringtones = options(
        std::iter::once((String::new(), format!("default ({})", state.sounds.default_sound())))
            .chain(sounds.iter().map(|s| (s.name.clone(), s.name.clone()))),
    );
    let _ = write!(
        body,
        "<div class=\"card\">\n<h3>New alarm</h3>\n<form action=\"/alarms\" method=\"post\">\n\
         <div class=\"row\">\n\
         <div><label>Hour</label><select name=\"hour\">{hours}</select></div>\n\
         <div><label>Minute</label><select name=\"minute\">{minutes}</select></div>\n\
         <div><label>AM/PM</label><select name=\"ampm\">{ampm}</select></div>\n\
         </div>\n\
         <label>Label</label><input name=\"label\" placeholder=\"wake up\" />\n\
         <label>Ringtone</label><select name=\"sound\">{ringtones}</select>\n\
         <div style=\"margin-top:1rem;\"><button type=\"submit\">Save Alarm</button></div>\n\
         </form>\n\
         <form action=\"/test\" method=\"post\" style=\"margin-top:.6rem;\">\
         <select name=\"sound\">{ringtones}</select> <button type=\"submit\">Test Play</button></form>\n\
         <p class=\"muted\">Music folder used: <code>{dir}</code></p>\n",
        dir = escape(&state.sounds.dir().display().to_string()),
    );
    if sounds.is_empty() {
        body.push_str(
            "<p class=\"warning\">No audio files found. Put .mp3 or .wav files in the music folder, \
             alarms will beep until then.</p>\n",
        );
    }
    body.push_str("</div>\n");

    body.push_str(
        "<div class=\"card\">\n<form action=\"/stop\" method=\"post\">\
         <button type=\"submit\">Stop Alarm</button>\
         <span class=\"muted\"> (stops every ringing alarm)</span></form>\n</div>\n",
    );

    layout("Alarm Clock", &body)
}
