//! HTML rendering for the browser UI.

use std::fmt::Write;

use crate::{
    gate::Actor,
    models::{User, Vm, VmWithOwners},
};

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn nav(actor: Option<&Actor>) -> String {
    match actor {
        None => r#"<a href="/login">Log in</a> | <a href="/register">Register</a>"#.to_string(),
        Some(actor) => {
            let mut links = String::from(
                r#"<a href="/vms">My VMs</a> | <a href="/vms/create">New VM</a> | <a href="/profile">Profile</a>"#,
            );
            if actor.is_admin {
                links.push_str(
                    r#" | <a href="/admin/users">Users</a> | <a href="/admin/vms">All VMs</a> | <a href="/swagger-ui">API docs</a>"#,
                );
            }
            let _ = write!(
                links,
                r#" | {} | <a href="/logout">Log out</a>"#,
                escape(&actor.email)
            );
            links
        }
    }
}

fn error_list(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let items: String = errors
        .iter()
        .map(|e| format!("<li>{}</li>", escape(e)))
        .collect();
    format!(r#"<ul class="errors">{items}</ul>"#)
}

/// Wraps page content in the shared document shell.
pub fn layout(title: &str, actor: Option<&Actor>, flash: Option<&str>, body: &str) -> String {
    let flash = flash
        .map(|message| format!(r#"<p class="flash">{}</p>"#, escape(message)))
        .unwrap_or_default();
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>{title} - VM Manager</title></head>
<body>
<nav>{nav}</nav>
{flash}
<main>
<h1>{title}</h1>
{body}
</main>
</body>
</html>"#,
        title = escape(title),
        nav = nav(actor),
    )
}

pub fn index() -> String {
    r#"<p>Manage your virtual machines: name, RAM and CPU.</p>"#.to_string()
}

/// Login and registration share one form; registration adds the full name field.
pub fn auth_form(action: &str, with_full_name: bool, email: &str, full_name: &str, errors: &[String]) -> String {
    let full_name_field = if with_full_name {
        format!(
            r#"<label>Full name <input name="full_name" value="{}" required></label><br>"#,
            escape(full_name)
        )
    } else {
        String::new()
    };
    format!(
        r#"{errors}<form method="post" action="{action}">
{full_name_field}<label>Email <input name="email" type="email" value="{email}" required></label><br>
<label>Password <input name="password" type="password" required></label><br>
<button type="submit">Submit</button>
</form>"#,
        errors = error_list(errors),
        email = escape(email),
    )
}

pub fn profile_form(user: &User, errors: &[String]) -> String {
    let identity = if user.is_admin {
        format!(
            "<p>{} (administrator; only the password can be changed here)</p>",
            escape(&user.email)
        )
    } else {
        format!(
            r#"<label>Full name <input name="full_name" value="{}"></label><br>
<label>Email <input name="email" type="email" value="{}"></label><br>"#,
            escape(user.full_name.as_deref().unwrap_or_default()),
            escape(&user.email)
        )
    };
    format!(
        r#"{errors}<form method="post" action="/profile">
{identity}
<label>New password <input name="new_password" type="password"></label><br>
<label>Repeat new password <input name="new_password2" type="password"></label><br>
<button type="submit">Save</button>
</form>"#,
        errors = error_list(errors),
    )
}

pub fn vm_list(vms: &[Vm]) -> String {
    if vms.is_empty() {
        return r#"<p>No VMs yet. <a href="/vms/create">Create one</a>.</p>"#.to_string();
    }
    let mut rows = String::new();
    for vm in vms {
        let deleted = vm.state.is_deleted();
        let _ = write!(
            rows,
            r#"<tr><td>{select}</td><td>{id}</td><td>{name}</td><td>{ram}</td><td>{cpu}</td><td>{action}</td></tr>"#,
            select = if deleted {
                String::new()
            } else {
                format!(r#"<input type="checkbox" name="vm_ids" value="{}">"#, vm.id)
            },
            id = vm.id,
            name = escape(&vm.name),
            ram = vm.ram_gb,
            cpu = vm.cpu,
            action = if deleted {
                "deleted".to_string()
            } else {
                format!(r#"<a href="/vms/{}/edit">Edit</a>"#, vm.id)
            },
        );
    }
    format!(
        r#"<form method="post" action="/vms/delete">
<table>
<tr><th></th><th>ID</th><th>Name</th><th>RAM, GB</th><th>CPU</th><th></th></tr>
{rows}
</table>
<button type="submit">Delete selected</button>
</form>"#
    )
}

pub fn vm_form(action: &str, name: &str, ram_gb: &str, cpu: &str, errors: &[String]) -> String {
    format!(
        r#"{errors}<form method="post" action="{action}">
<label>Name <input name="name" value="{name}" required></label><br>
<label>RAM, GB (0-32) <input name="ram_gb" type="number" min="0" max="32" value="{ram_gb}" required></label><br>
<label>CPU (1-16) <input name="cpu" type="number" min="1" max="16" value="{cpu}" required></label><br>
<button type="submit">Save</button>
</form>"#,
        errors = error_list(errors),
        action = escape(action),
        name = escape(name),
        ram_gb = escape(ram_gb),
        cpu = escape(cpu),
    )
}

pub fn admin_users(users: &[User]) -> String {
    let mut rows = String::new();
    for user in users {
        let action = if user.is_admin {
            "administrator".to_string()
        } else {
            format!(
                r#"<form method="post" action="/admin/users/{}/toggle-block"><button type="submit">{}</button></form>"#,
                user.id,
                if user.is_blocked { "Unblock" } else { "Block" }
            )
        };
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            user.id,
            escape(&user.email),
            escape(user.full_name.as_deref().unwrap_or_default()),
            if user.is_blocked { "blocked" } else { "active" },
            action
        );
    }
    format!(
        "<table>\n<tr><th>ID</th><th>Email</th><th>Full name</th><th>Status</th><th></th></tr>\n{rows}\n</table>"
    )
}

pub fn admin_vms(rows: &[VmWithOwners]) -> String {
    let mut out = String::new();
    for row in rows {
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            row.vm.id,
            escape(&row.vm.name),
            row.vm.ram_gb,
            row.vm.cpu,
            if row.vm.state.is_deleted() { "deleted" } else { "active" },
            escape(&row.owners.join(", "))
        );
    }
    format!(
        "<table>\n<tr><th>ID</th><th>Name</th><th>RAM, GB</th><th>CPU</th><th>State</th><th>Owners</th></tr>\n{out}\n</table>"
    )
}

pub fn error_message(message: &str, errors: &[String]) -> String {
    format!("<p>{}</p>{}", escape(message), error_list(errors))
}
