//! Workspaces, memberships and the file tree.

use super::memory::{Tables, insert_unique, replace_existing, require};
use super::ordering::cmp_order;
use super::StorageError;
use crate::ids::Id;
use crate::models::{ContentKind, FileEntry, Role, Workspace, WorkspaceMember};

impl Tables {
    pub fn get_workspace(&self, id: Id) -> Option<Workspace> {
        self.workspaces.get(&id).cloned()
    }

    /// Workspaces the user belongs to, by display order.
    pub fn list_workspaces_for_user(&self, user_id: Id) -> Vec<Workspace> {
        let mut out: Vec<Workspace> = self
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| self.workspaces.get(&m.workspace_id).cloned())
            .collect();
        out.sort_by(|a, b| cmp_order((a.display_order, a.id), (b.display_order, b.id)));
        out
    }

    pub fn create_workspace(&mut self, workspace: Workspace) -> Result<(), StorageError> {
        insert_unique(&mut self.workspaces, workspace.id, workspace, "workspace")
    }

    pub fn update_workspace(&mut self, workspace: Workspace) -> Result<(), StorageError> {
        if let Some(env_id) = workspace.active_env_id {
            match self.environments.get(&env_id) {
                Some(env) if env.workspace_id == workspace.id => {}
                _ => {
                    return Err(StorageError::referential(
                        "workspace",
                        format!("environment {} is not in this workspace", env_id),
                    ));
                }
            }
        }
        replace_existing(&mut self.workspaces, workspace.id, workspace, "workspace")
    }

    /// Remove a workspace and everything it owns.
    pub fn delete_workspace(&mut self, id: Id) -> Result<Workspace, StorageError> {
        let workspace = self
            .workspaces
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("workspace", id))?;

        self.members.retain(|_, m| m.workspace_id != id);
        self.files.retain(|_, f| f.workspace_id != id);

        let env_ids: Vec<Id> = self
            .environments
            .values()
            .filter(|e| e.workspace_id == id)
            .map(|e| e.id)
            .collect();
        for env_id in env_ids {
            self.delete_environment(env_id)?;
        }

        let http_ids: Vec<Id> = self
            .http
            .values()
            .filter(|h| h.workspace_id == id && !h.is_delta && !h.is_version)
            .map(|h| h.id)
            .collect();
        for http_id in http_ids {
            // A base may already be gone as part of an earlier cascade.
            if self.http.contains_key(&http_id) {
                self.delete_http(http_id)?;
            }
        }
        // Leftovers: snapshots whose live row is gone, or stray deltas.
        let stray: Vec<Id> = self
            .http
            .values()
            .filter(|h| h.workspace_id == id)
            .map(|h| h.id)
            .collect();
        for http_id in stray {
            if self.http.contains_key(&http_id) {
                self.delete_http(http_id)?;
            }
        }

        let flow_ids: Vec<Id> = self
            .flows
            .values()
            .filter(|f| f.workspace_id == id)
            .map(|f| f.id)
            .collect();
        for flow_id in flow_ids {
            self.delete_flow(flow_id)?;
        }

        Ok(workspace)
    }

    pub fn add_member(&mut self, member: WorkspaceMember) -> Result<(), StorageError> {
        require(&self.workspaces, member.workspace_id, "member", "workspace")?;
        if self
            .members
            .values()
            .any(|m| m.workspace_id == member.workspace_id && m.user_id == member.user_id)
        {
            return Err(StorageError::conflict(
                "member",
                format!("user {} is already a member", member.user_id),
            ));
        }
        insert_unique(&mut self.members, member.id, member, "member")
    }

    pub fn member_role(&self, workspace_id: Id, user_id: Id) -> Option<Role> {
        self.members
            .values()
            .find(|m| m.workspace_id == workspace_id && m.user_id == user_id)
            .map(|m| m.role)
    }

    pub fn list_members(&self, workspace_id: Id) -> Vec<WorkspaceMember> {
        self.members
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    pub fn remove_member(&mut self, workspace_id: Id, user_id: Id) -> Result<(), StorageError> {
        let id = self
            .members
            .values()
            .find(|m| m.workspace_id == workspace_id && m.user_id == user_id)
            .map(|m| m.id)
            .ok_or_else(|| StorageError::not_found("member", user_id))?;
        let owners = self
            .members
            .values()
            .filter(|m| m.workspace_id == workspace_id && m.role == Role::Owner)
            .count();
        if owners == 1 && self.members.get(&id).map(|m| m.role) == Some(Role::Owner) {
            return Err(StorageError::conflict(
                "member",
                "cannot remove the last owner",
            ));
        }
        self.members.remove(&id);
        Ok(())
    }

    pub fn get_file(&self, id: Id) -> Option<FileEntry> {
        self.files.get(&id).cloned()
    }

    /// File entries of a workspace, by display order.
    pub fn list_files(&self, workspace_id: Id) -> Vec<FileEntry> {
        let mut out: Vec<FileEntry> = self
            .files
            .values()
            .filter(|f| f.workspace_id == workspace_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| cmp_order((a.display_order, a.id), (b.display_order, b.id)));
        out
    }

    /// Siblings under `parent_id` (root when `None`), by display order.
    pub fn list_children(&self, workspace_id: Id, parent_id: Option<Id>) -> Vec<FileEntry> {
        self.list_files(workspace_id)
            .into_iter()
            .filter(|f| f.parent_id == parent_id)
            .collect()
    }

    pub fn file_for_content(&self, content_id: Id) -> Option<FileEntry> {
        self.files
            .values()
            .find(|f| f.content_id == Some(content_id))
            .cloned()
    }

    pub fn create_file(&mut self, entry: FileEntry) -> Result<(), StorageError> {
        require(&self.workspaces, entry.workspace_id, "file", "workspace")?;
        self.check_file_parent(&entry)?;
        insert_unique(&mut self.files, entry.id, entry, "file")
    }

    pub fn update_file(&mut self, entry: FileEntry) -> Result<(), StorageError> {
        self.check_file_parent(&entry)?;
        // Moving a folder under its own descendant would detach the subtree.
        let mut cursor = entry.parent_id;
        while let Some(parent) = cursor {
            if parent == entry.id {
                return Err(StorageError::invalid(
                    "file",
                    "folder cannot be moved into itself",
                ));
            }
            cursor = self.files.get(&parent).and_then(|f| f.parent_id);
        }
        replace_existing(&mut self.files, entry.id, entry, "file")
    }

    fn check_file_parent(&self, entry: &FileEntry) -> Result<(), StorageError> {
        if let Some(parent_id) = entry.parent_id {
            match self.files.get(&parent_id) {
                Some(p) if p.kind == ContentKind::Folder && p.workspace_id == entry.workspace_id => {}
                Some(_) => {
                    return Err(StorageError::invalid("file", "parent is not a folder"));
                }
                None => {
                    return Err(StorageError::referential(
                        "file",
                        format!("folder {} does not exist", parent_id),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Remove an entry and its descendants; returns the removed entries.
    pub fn delete_file_tree(&mut self, id: Id) -> Result<Vec<FileEntry>, StorageError> {
        if !self.files.contains_key(&id) {
            return Err(StorageError::not_found("file", id));
        }
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            stack.extend(
                self.files
                    .values()
                    .filter(|f| f.parent_id == Some(current))
                    .map(|f| f.id),
            );
            if let Some(entry) = self.files.remove(&current) {
                removed.push(entry);
            }
        }
        Ok(removed)
    }
}
