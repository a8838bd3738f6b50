//! Test data model for the fake IMAP server
//!
//! Folders and emails live in plain structs a test builds up front
//! and can inspect or mutate afterwards through the server handle.

use std::collections::BTreeSet;

/// One stored email.
#[derive(Debug, Clone)]
pub struct Email {
    pub uid: u32,
    /// Wire-form flags, e.g. `\Seen` or `$Work`.
    pub flags: BTreeSet<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    /// Extra header lines beyond Subject/From/To.
    pub extra_headers: Vec<(String, String)>,
    /// The text body (no headers).
    pub body: String,
    pub internal_date: String,
}

impl Email {
    pub fn new(uid: u32, subject: &str) -> Self {
        Self {
            uid,
            flags: BTreeSet::new(),
            subject: subject.to_string(),
            from: "alice@example.org".to_string(),
            to: "bob@example.org".to_string(),
            extra_headers: Vec::new(),
            body: "Hello from the fake server.".to_string(),
            internal_date: "23-Oct-2023 10:00:00 +0000".to_string(),
        }
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// The RFC 2822 header block, CRLF terminated, without the blank
    /// separator line.
    pub fn header_block(&self) -> String {
        let mut block = format!(
            "Subject: {}\r\nFrom: {}\r\nTo: {}\r\n",
            self.subject, self.from, self.to
        );
        for (name, value) in &self.extra_headers {
            block.push_str(&format!("{name}: {value}\r\n"));
        }
        block
    }

    /// The complete RFC 2822 message.
    pub fn full_text(&self) -> String {
        format!("{}\r\n{}", self.header_block(), self.body)
    }
}

/// One server-side folder. The name is the wire form (modified UTF-7
/// for international names).
#[derive(Debug, Clone)]
pub struct TestFolder {
    pub name: String,
    pub emails: Vec<Email>,
    pub read_only: bool,
}

/// The whole server-side state a test scripts against.
#[derive(Debug, Clone)]
pub struct Mailbox {
    pub folders: Vec<TestFolder>,
    pub uid_validity: u32,
    /// Extra capabilities beyond IMAP4rev1 (e.g. `AUTH=PLAIN`,
    /// `QUOTA`, `ACL`, `NAMESPACE`).
    pub capabilities: Vec<String>,
    pub expected_user: String,
    pub expected_password: String,
    pub accept_login: bool,
}

impl Mailbox {
    pub fn folder(&self, name: &str) -> Option<&TestFolder> {
        self.folders
            .iter()
            .find(|f| f.name == name || (name.eq_ignore_ascii_case("INBOX") && f.name == "INBOX"))
    }

    pub fn folder_mut(&mut self, name: &str) -> Option<&mut TestFolder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }

    pub fn uid_next(&self, folder: &str) -> u32 {
        self.folder(folder)
            .and_then(|f| f.emails.iter().map(|e| e.uid).max())
            .map_or(1, |max| max + 1)
    }
}

/// Fluent builder for test mailboxes.
pub struct MailboxBuilder {
    mailbox: Mailbox,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            mailbox: Mailbox {
                folders: vec![TestFolder {
                    name: "INBOX".to_string(),
                    emails: Vec::new(),
                    read_only: false,
                }],
                uid_validity: 1000,
                capabilities: Vec::new(),
                expected_user: "user".to_string(),
                expected_password: "pw".to_string(),
                accept_login: true,
            },
        }
    }

    pub fn capability(mut self, name: &str) -> Self {
        self.mailbox.capabilities.push(name.to_string());
        self
    }

    pub fn folder(mut self, name: &str) -> Self {
        self.mailbox.folders.push(TestFolder {
            name: name.to_string(),
            emails: Vec::new(),
            read_only: false,
        });
        self
    }

    pub fn read_only_folder(mut self, name: &str) -> Self {
        self.mailbox.folders.push(TestFolder {
            name: name.to_string(),
            emails: Vec::new(),
            read_only: true,
        });
        self
    }

    /// Add an email to the most recently declared folder.
    pub fn email(mut self, email: Email) -> Self {
        if let Some(folder) = self.mailbox.folders.last_mut() {
            folder.emails.push(email);
        }
        self
    }

    /// Add an email to INBOX regardless of declaration order.
    pub fn inbox_email(mut self, email: Email) -> Self {
        if let Some(folder) = self.mailbox.folder_mut("INBOX") {
            folder.emails.push(email);
        }
        self
    }

    pub fn reject_logins(mut self) -> Self {
        self.mailbox.accept_login = false;
        self
    }

    pub fn build(self) -> Mailbox {
        self.mailbox
    }
}
