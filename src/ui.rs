use crate::models::{Identity, Theme};
use crate::projector::{CategoryView, DashboardView, TaskView};

pub fn render_dashboard(view: &DashboardView, theme: Theme, identity: Option<&Identity>) -> String {
    let user = match identity {
        Some(identity) => format!("Signed in as {}", escape(&identity.name)),
        None => "Not signed in".to_string(),
    };
    let categories: String = view.categories.iter().map(render_category).collect();
    let notices: String = view
        .notifications
        .iter()
        .map(|note| {
            format!(
                r#"<div class="notice" data-type="{}">{}</div>"#,
                note.kind.as_str(),
                escape(&note.message)
            )
        })
        .collect();

    DASHBOARD_HTML
        .replace("{{THEME}}", theme.as_str())
        .replace("{{USER}}", &user)
        .replace("{{PERCENT}}", &format_percent(view.overall.percentage))
        .replace("{{COMPLETED}}", &view.overall.completed_count.to_string())
        .replace("{{MILESTONE}}", &escape(&view.overall.milestone))
        .replace("{{NOTICES}}", &notices)
        .replace("{{CATEGORIES}}", &categories)
}

/// Whole numbers print without a fraction, as the backend sends them.
pub fn format_percent(value: f64) -> String {
    format!("{value}%")
}

fn render_category(category: &CategoryView) -> String {
    let tasks: String = category
        .tasks
        .iter()
        .map(|task| render_task(&category.key, task))
        .collect();
    format!(
        r#"<section class="week" data-category="{key}">
      <div class="week-header">
        <h2>{title}</h2>
        <span class="week-progress" data-role="category-progress">{completed}/{total} &middot; {percent}%</span>
      </div>
      <div class="bar"><span style="width: {percent}%"></span></div>
      <ul class="tasks">{tasks}</ul>
    </section>"#,
        key = escape(&category.key),
        title = escape(&category.title),
        completed = category.completed,
        total = category.total,
        percent = category.percent,
        tasks = tasks,
    )
}

fn render_task(category: &str, task: &TaskView) -> String {
    let subtasks: String = task
        .subtasks
        .iter()
        .map(|subtask| {
            format!(
                r#"<li><label><input type="checkbox" data-category="{category}" data-task="{task}" data-subtask="{key}"{checked} /> {key}</label></li>"#,
                category = escape(category),
                task = escape(&task.id),
                key = escape(&subtask.key),
                checked = checked_attr(subtask.checked),
            )
        })
        .collect();
    format!(
        r#"<li class="task">
          <label><input type="checkbox" data-category="{category}" data-task="{id}"{checked} /> {title}</label>
          <ul class="subtasks">{subtasks}</ul>
        </li>"#,
        category = escape(category),
        id = escape(&task.id),
        checked = checked_attr(task.checked),
        title = escape(&task.title),
        subtasks = subtasks,
    )
}

fn checked_attr(checked: bool) -> &'static str {
    if checked { " checked" } else { "" }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en" data-theme="{{THEME}}">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Lab Progress</title>
  <style>
    :root {
      --bg-1: #f8f3e6;
      --bg-2: #f5d3a7;
      --ink: #2b2a28;
      --accent: #ff6b4a;
      --accent-2: #2f4858;
      --card: rgba(255, 255, 255, 0.86);
      --shadow: 0 24px 60px rgba(47, 72, 88, 0.18);
    }

    [data-theme="dark"] {
      --bg-1: #1d2126;
      --bg-2: #2f4858;
      --ink: #f1ede6;
      --card: rgba(30, 34, 40, 0.9);
    }

    * {
      box-sizing: border-box;
    }

    body {
      margin: 0;
      min-height: 100vh;
      background: radial-gradient(circle at top, var(--bg-2), transparent 60%),
        linear-gradient(135deg, var(--bg-1), var(--bg-1) 60%, var(--bg-2) 100%);
      color: var(--ink);
      font-family: "Trebuchet MS", sans-serif;
      display: grid;
      place-items: center;
      padding: 32px 18px 48px;
    }

    .app {
      width: min(900px, 100%);
      background: var(--card);
      border-radius: 28px;
      box-shadow: var(--shadow);
      padding: 36px;
      display: grid;
      gap: 24px;
    }

    header {
      display: flex;
      flex-wrap: wrap;
      justify-content: space-between;
      gap: 12px;
    }

    h1 {
      font-family: "Georgia", serif;
      margin: 0;
    }

    .subtitle {
      margin: 4px 0 0;
      opacity: 0.75;
    }

    .overall {
      display: flex;
      align-items: baseline;
      gap: 16px;
    }

    .overall .value {
      font-size: 2.4rem;
      font-weight: 600;
      color: var(--accent);
    }

    .week {
      border: 1px solid rgba(47, 72, 88, 0.12);
      border-radius: 18px;
      padding: 18px;
    }

    .week-header {
      display: flex;
      justify-content: space-between;
      align-items: center;
    }

    .week-header h2 {
      margin: 0;
      font-size: 1.2rem;
    }

    .bar {
      height: 8px;
      border-radius: 999px;
      background: rgba(47, 72, 88, 0.12);
      margin: 12px 0;
      overflow: hidden;
    }

    .bar span {
      display: block;
      height: 100%;
      background: var(--accent);
    }

    ul {
      list-style: none;
      margin: 0;
      padding-left: 0;
    }

    .subtasks {
      padding-left: 28px;
      font-size: 0.9rem;
    }

    button {
      border: none;
      border-radius: 999px;
      padding: 10px 16px;
      font-weight: 600;
      cursor: pointer;
      background: var(--accent-2);
      color: white;
    }

    .notice {
      border-radius: 12px;
      padding: 10px 14px;
      background: rgba(47, 72, 88, 0.1);
    }

    .notice[data-type="error"] {
      background: rgba(198, 59, 43, 0.15);
      color: #c63b2b;
    }
  </style>
</head>
<body>
  <main class="app">
    <header>
      <div>
        <h1>Lab Progress</h1>
        <p class="subtitle">{{USER}}</p>
      </div>
      <div class="actions">
        <button type="button" id="theme-btn">Toggle theme</button>
        <form method="post" action="/local/new-lab" style="display: inline">
          <button type="submit">Start new lab</button>
        </form>
      </div>
    </header>

    <section class="overall">
      <span class="value" id="overall-percent">{{PERCENT}}</span>
      <span id="overall-count">{{COMPLETED}} tasks complete</span>
      <span id="milestone">{{MILESTONE}}</span>
    </section>

    <div id="notices">{{NOTICES}}</div>

    {{CATEGORIES}}
  </main>

  <script>
    const notices = document.getElementById('notices');
    const percentEl = document.getElementById('overall-percent');

    const notify = (message, type) => {
      const el = document.createElement('div');
      el.className = 'notice';
      el.dataset.type = type || 'info';
      el.textContent = message;
      notices.appendChild(el);
      setTimeout(() => el.remove(), 4000);
    };

    Array.from(notices.children).forEach((el) => setTimeout(() => el.remove(), 4000));

    document.querySelectorAll('input[type="checkbox"][data-task]').forEach((box) => {
      box.addEventListener('change', async () => {
        const payload = {
          category: box.dataset.category,
          task_id: box.dataset.task,
          subtask: box.dataset.subtask || null,
          checked: box.checked
        };
        try {
          const res = await fetch('/local/toggle', {
            method: 'POST',
            headers: { 'content-type': 'application/json' },
            body: JSON.stringify(payload)
          });
          const data = await res.json();
          box.checked = data.checked;
          if (!data.success) {
            notify(data.error || 'Request failed', 'error');
            return;
          }
          if (typeof data.percentage === 'number') {
            percentEl.textContent = `${data.percentage}%`;
          }
        } catch (err) {
          box.checked = !payload.checked;
          notify(err.message || 'Request failed', 'error');
        }
      });
    });

    document.getElementById('theme-btn').addEventListener('click', async () => {
      const root = document.documentElement;
      const next = root.dataset.theme === 'dark' ? 'light' : 'dark';
      root.dataset.theme = next;
      await fetch('/local/theme', {
        method: 'POST',
        headers: { 'content-type': 'application/json' },
        body: JSON.stringify({ theme: next })
      }).catch(() => notify('Theme not saved', 'error'));
    });
  </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::events::Notification;
    use crate::models::ProgressSnapshot;
    use crate::projector::project_dashboard;

    #[test]
    fn renders_server_percentage_and_escapes_names() {
        let snapshot = ProgressSnapshot {
            completed_task_count: 1,
            progress_percentage: Some(2.0),
            categories: None,
        };
        let view = project_dashboard(
            &snapshot,
            &Catalog::default(),
            vec![Notification::error("<locked>")],
        );
        let identity = Identity {
            name: "<ada>".to_string(),
            role: Default::default(),
        };
        let html = render_dashboard(&view, Theme::Dark, Some(&identity));
        assert!(html.contains(r#"<span class="value" id="overall-percent">2%</span>"#));
        assert!(html.contains("Signed in as &lt;ada&gt;"));
        assert!(html.contains("&lt;locked&gt;"));
        assert!(html.contains(r#"data-theme="dark""#));
        assert!(html.contains(r#"data-task="week1-install-server2012""#));
    }

    #[test]
    fn fractional_percentages_keep_their_digits() {
        assert_eq!(format_percent(45.5), "45.5%");
        assert_eq!(format_percent(0.0), "0%");
    }
}
